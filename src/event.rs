//! Normalized touch events and the sink they are delivered to.

use alloc::vec::Vec;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContactStatus {
    Absent,
    Present,
    /// Present, but the firmware flagged the position as inaccurate.
    Inaccurate,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ToolType {
    Finger,
    GlovedFinger,
}

/// One multi-contact slot update.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Contact {
    pub slot: u8,
    pub status: ContactStatus,
    pub tool: ToolType,
    pub x: u16,
    pub y: u16,
    pub major: u8,
    pub minor: u8,
    pub pressure: Option<u8>,
}

impl Contact {
    pub fn lifted(slot: u8) -> Self {
        Self {
            slot,
            status: ContactStatus::Absent,
            tool: ToolType::Finger,
            x: 0,
            y: 0,
            major: 0,
            minor: 0,
            pressure: None,
        }
    }

    pub fn is_present(&self) -> bool {
        self.status != ContactStatus::Absent
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StylusTool {
    Pen,
    Eraser,
}

/// Single-contact stylus pointer state.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StylusState {
    Down { tool: StylusTool, x: u16, y: u16 },
    Released,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Event {
    Contact(Contact),
    Stylus(StylusState),
    Key { code: u16, pressed: bool },
    /// End of a consistent group of updates.
    Sync,
}

/// Consumer of normalized events (an input subsystem, a HID report builder, a test log).
pub trait EventSink {
    fn emit(&mut self, event: Event);
}

impl EventSink for Vec<Event> {
    fn emit(&mut self, event: Event) {
        self.push(event);
    }
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn emit(&mut self, event: Event) {
        (**self).emit(event);
    }
}

/// Events collected during one report cycle; only flushed once the cycle succeeded.
#[derive(Debug, Default)]
pub struct Frame {
    events: Vec<Event>,
}

impl Frame {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn contact(&mut self, contact: Contact) {
        self.events.push(Event::Contact(contact));
    }

    pub fn sync(&mut self) {
        self.events.push(Event::Sync);
    }

    /// Press and release of `code`, each followed by a sync.
    pub fn key_tap(&mut self, code: u16) {
        self.events.push(Event::Key { code, pressed: true });
        self.events.push(Event::Sync);
        self.events.push(Event::Key { code, pressed: false });
        self.events.push(Event::Sync);
    }

    /// Lift every slot (and the stylus when `stylus` is set).
    pub fn release_all(&mut self, slots: u8, stylus: bool) {
        for slot in 0..slots {
            self.contact(Contact::lifted(slot));
        }
        self.sync();
        if stylus {
            self.push(Event::Stylus(StylusState::Released));
            self.sync();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Drop events recorded after the first `len`.
    pub fn truncate(&mut self, len: usize) {
        self.events.truncate(len);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn flush<S: EventSink + ?Sized>(&mut self, sink: &mut S) {
        for event in self.events.drain(..) {
            sink.emit(event);
        }
    }
}
