mod common;

use std::sync::{Arc, Mutex};

use rmi4_touch::expansion::EntryState;
use rmi4_touch::{ExpansionContext, ExpansionFeature, ExpansionRegistry, FeatureKind, Transport};

use common::*;

#[derive(Clone, Default)]
struct Calls(Arc<Mutex<Vec<String>>>);

impl Calls {
    fn push(&self, call: impl Into<String>) {
        self.0.lock().unwrap().push(call.into());
    }

    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

struct Recorder {
    kind: FeatureKind,
    calls: Calls,
}

impl ExpansionFeature<FakeDevice> for Recorder {
    fn kind(&self) -> FeatureKind {
        self.kind
    }

    fn init(&mut self, ctx: &mut ExpansionContext<'_, FakeDevice>) {
        self.calls.push(format!("init {}", ctx.identity.product_id));
        ctx.bus.write(0x0200, &[0x5A]).unwrap();
    }

    fn remove(&mut self, _ctx: &mut ExpansionContext<'_, FakeDevice>) {
        self.calls.push("remove");
    }

    fn reset(&mut self, _ctx: &mut ExpansionContext<'_, FakeDevice>) {
        self.calls.push("reset");
    }

    fn reinit(&mut self, _ctx: &mut ExpansionContext<'_, FakeDevice>) {
        self.calls.push("reinit");
    }

    fn suspend(&mut self, _ctx: &mut ExpansionContext<'_, FakeDevice>) {
        self.calls.push("suspend");
    }

    fn resume(&mut self, _ctx: &mut ExpansionContext<'_, FakeDevice>) {
        self.calls.push("resume");
    }

    fn attention(&mut self, _ctx: &mut ExpansionContext<'_, FakeDevice>, sources: u8) {
        self.calls.push(format!("attention {:#04x}", sources));
    }

    fn early_suspend(&mut self, _ctx: &mut ExpansionContext<'_, FakeDevice>) {
        self.calls.push("early_suspend");
    }

    fn late_resume(&mut self, _ctx: &mut ExpansionContext<'_, FakeDevice>) {
        self.calls.push("late_resume");
    }
}

fn registered(kind: FeatureKind) -> (Rig, Calls) {
    let calls = Calls::default();
    let expansions: Arc<ExpansionRegistry<FakeDevice>> = Arc::new(ExpansionRegistry::new());
    expansions.register(Box::new(Recorder {
        kind,
        calls: calls.clone(),
    }));
    let r = rig_with(reference_device(), reference_config(), expansions);
    (r, calls)
}

fn attached(kind: FeatureKind) -> (Rig, Calls) {
    let (r, calls) = registered(kind);
    r.ctl.probe().unwrap();
    r.ctl.run_pending_work(&mut RecordingDelay::default()).unwrap();
    calls.take();
    (r, calls)
}

#[test]
fn init_runs_once_after_probe() {
    let (r, calls) = registered(FeatureKind::FirmwareUpdater);
    r.ctl.probe().unwrap();
    assert_eq!(r.expansions.state(FeatureKind::FirmwareUpdater), Some(EntryState::PendingInsert));
    assert!(calls.take().is_empty());

    let mut delay = RecordingDelay::default();
    r.ctl.run_pending_work(&mut delay).unwrap();
    assert_eq!(delay.waits(), vec![500]);
    assert_eq!(calls.take(), vec!["init TM3080"]);
    assert_eq!(r.expansions.state(FeatureKind::FirmwareUpdater), Some(EntryState::Attached));
    assert_eq!(r.dev.get(0x0200), 0x5A);

    r.ctl.run_pending_work(&mut delay).unwrap();
    assert!(calls.take().is_empty());
}

#[test]
fn unregister_before_drain_skips_every_callback() {
    let (r, calls) = registered(FeatureKind::Proximity);
    r.ctl.probe().unwrap();
    r.expansions.unregister(FeatureKind::Proximity);
    assert!(r.expansions.is_empty());

    r.ctl.run_pending_work(&mut RecordingDelay::default()).unwrap();
    assert!(calls.take().is_empty());
}

#[test]
fn late_registration_is_drained_by_pending_work() {
    let r = rig(reference_device(), reference_config());
    r.ctl.probe().unwrap();
    r.ctl.run_pending_work(&mut RecordingDelay::default()).unwrap();
    assert!(!r.ctl.has_pending_work());

    let calls = Calls::default();
    r.expansions.register(Box::new(Recorder {
        kind: FeatureKind::Custom(7),
        calls: calls.clone(),
    }));
    assert!(r.ctl.has_pending_work());
    r.ctl.run_pending_work(&mut RecordingDelay::default()).unwrap();
    assert_eq!(calls.take(), vec!["init TM3080"]);
}

#[test]
fn attention_receives_first_source_byte() {
    let (r, calls) = attached(FeatureKind::ActivePen);
    assert_irq(&r.dev, 0x0A);
    r.ctl.service().unwrap();
    assert_eq!(calls.take(), vec!["attention 0x0a"]);
}

#[test]
fn pending_features_see_no_attention() {
    let (r, calls) = registered(FeatureKind::ActivePen);
    r.ctl.probe().unwrap();
    assert_irq(&r.dev, 0x02);
    r.ctl.service().unwrap();
    assert!(calls.take().is_empty());
}

#[test]
fn unregister_after_attach_removes_on_drain() {
    let (r, calls) = attached(FeatureKind::TestReporting);
    r.expansions.unregister(FeatureKind::TestReporting);
    assert_eq!(r.expansions.state(FeatureKind::TestReporting), Some(EntryState::PendingRemove));

    // removal pending: no more lifecycle callbacks
    assert_irq(&r.dev, 0x02);
    r.ctl.service().unwrap();
    assert!(calls.take().is_empty());

    r.ctl.run_pending_work(&mut RecordingDelay::default()).unwrap();
    assert_eq!(calls.take(), vec!["remove"]);
    assert!(r.expansions.is_empty());
}

#[test]
fn power_transitions_are_forwarded() {
    let (r, calls) = attached(FeatureKind::Gesture);
    r.ctl.suspend().unwrap();
    r.ctl.resume().unwrap();
    assert_eq!(calls.take(), vec!["suspend", "reset", "resume"]);

    r.ctl.early_suspend().unwrap();
    r.ctl.late_resume().unwrap();
    assert_eq!(calls.take(), vec!["early_suspend", "reset", "late_resume"]);
}

#[test]
fn rebuild_replays_remove_and_init() {
    let (r, calls) = attached(FeatureKind::Video);
    r.ctl.reset(true).unwrap();
    r.ctl.run_pending_work(&mut RecordingDelay::default()).unwrap();
    assert_eq!(calls.take(), vec!["remove", "init TM3080"]);
    assert_eq!(r.expansions.state(FeatureKind::Video), Some(EntryState::Attached));
}

#[test]
fn spontaneous_reset_reinitializes_features() {
    let (r, calls) = attached(FeatureKind::Debug);
    r.dev.set(F01_DATA, &[0x81, 0x00]);
    r.ctl.service().unwrap();
    r.dev.set(F01_DATA, &[0x00, 0x00]);
    assert_eq!(calls.take(), vec!["reinit", "attention 0x00"]);
}
