//! Page Description Table scan: builds the function registry and reads device identity.

use embedded_hal::delay::DelayNs;

use crate::bus::Transport;
use crate::data_types::{Config, DeviceIdentity, SensorGeometry};
use crate::error::Error;
use crate::function::{
    read_regs, FunctionDescriptor, FunctionHandler, FunctionKind, FunctionRegistry, InterruptAssignment, F01, F11,
    F12, F1a,
};
use crate::registers::{function, MAX_SCAN_RESTARTS, PAGES_TO_SERVICE, PDT_END, PDT_ENTRY_SIZE, PDT_START};

/// Result of one successful scan.
#[derive(Debug)]
pub struct Discovery {
    pub registry: FunctionRegistry,
    pub identity: DeviceIdentity,
    /// Geometry of the last touch function found, if any.
    pub geometry: SensorGeometry,
    /// Only the bootloader answered, or F01 reported flash-programming mode.
    pub bootloader: bool,
}

enum ScanOutcome {
    Complete(Discovery),
    /// The device left its bootloader mid-scan; the table read so far is stale.
    Restart,
}

/// Walk every page of the descriptor table and negotiate each known function.
pub fn discover<T: Transport, D: DelayNs>(
    bus: &mut T,
    delay: &mut D,
    config: &Config,
) -> Result<Discovery, Error<T::Error>> {
    let mut restarts = 0;
    loop {
        match scan_once(bus, delay, config)? {
            ScanOutcome::Complete(discovery) => return Ok(discovery),
            ScanOutcome::Restart if restarts < MAX_SCAN_RESTARTS => {
                restarts += 1;
                log::info!("rescanning function table ({})", restarts);
            }
            ScanOutcome::Restart => {
                log::error!("device keeps rebooting during scan");
                return Err(Error::DeviceUnresponsive);
            }
        }
    }
}

fn scan_once<T: Transport, D: DelayNs>(
    bus: &mut T,
    delay: &mut D,
    config: &Config,
) -> Result<ScanOutcome, Error<T::Error>> {
    let mut registry = FunctionRegistry::new();
    let mut geometry = SensorGeometry::default();
    let mut cumulative: u8 = 0;
    let mut f01: Option<F01> = None;
    let mut f35_found = false;
    let mut flash_prog = false;

    'pages: for page in 0..PAGES_TO_SERVICE {
        let page_base = (page as u16) << 8;
        let mut addr = PDT_START;
        while addr > PDT_END {
            let mut raw = [0u8; FunctionDescriptor::SIZE];
            read_regs(bus, page_base | addr, &mut raw)?;
            let desc = FunctionDescriptor::parse(&raw, page);
            if desc.number == 0 {
                break;
            }
            log::debug!(
                "F{:02x} found (page {}, {} interrupt sources)",
                desc.number,
                page,
                desc.intr_src_count
            );

            if desc.intr_src_count > 0 {
                match desc.number {
                    function::DEVICE_CONTROL => {
                        let interrupts = InterruptAssignment::new(cumulative, desc.intr_src_count)?;
                        let handler = F01::new(desc.addresses());
                        let (status, waited) = handler.check_status(bus, delay, config.status_timeout_ms)?;
                        if waited {
                            return Ok(ScanOutcome::Restart);
                        }
                        registry.push(FunctionHandler {
                            number: desc.number,
                            version: desc.version,
                            base: desc.addresses(),
                            interrupts,
                            kind: FunctionKind::DeviceControl(handler),
                        });
                        f01 = Some(handler);
                        if status.flash_prog() {
                            log::warn!("device in flash programming mode");
                            flash_prog = true;
                            cumulative += desc.intr_src_count;
                            break 'pages;
                        }
                    }
                    function::TOUCH_2D_LEGACY | function::TOUCH_2D | function::BUTTONS => {
                        match negotiate(bus, &desc, cumulative, config) {
                            Ok(handler) => {
                                if let Some(g) = touch_geometry(&handler.kind) {
                                    geometry = g;
                                }
                                registry.push(handler);
                            }
                            Err(e) if e.is_function_local() && !config.fatal_function_errors => {
                                log::warn!("F{:02x} dropped: {}", desc.number, e);
                            }
                            Err(e) => {
                                log::error!("F{:02x} negotiation failed: {}", desc.number, e);
                                return Err(e);
                            }
                        }
                    }
                    function::BOOTLOADER => f35_found = true,
                    other => log::debug!("F{:02x} not handled", other),
                }
            } else if desc.number == function::BOOTLOADER {
                f35_found = true;
            }

            cumulative = cumulative.saturating_add(desc.intr_src_count);
            addr -= PDT_ENTRY_SIZE;
        }
    }

    registry.set_interrupt_sources(cumulative);
    log::debug!("{} interrupt sources in use", cumulative);

    let Some(f01) = f01 else {
        if f35_found {
            log::info!("only the microbootloader is present");
            return Ok(ScanOutcome::Complete(Discovery {
                registry: FunctionRegistry::new(),
                identity: DeviceIdentity::default(),
                geometry,
                bootloader: true,
            }));
        }
        log::error!("no device control function found");
        return Err(Error::DiscoveryFailed);
    };

    let mut identity = f01.read_identity(bus)?;
    identity.flash_prog = flash_prog;
    log::info!(
        "product {} firmware {}",
        identity.product_id.as_str(),
        identity.firmware_id
    );
    f01.set_configured(bus)?;

    Ok(ScanOutcome::Complete(Discovery {
        registry,
        identity,
        geometry,
        bootloader: flash_prog,
    }))
}

fn negotiate<T: Transport>(
    bus: &mut T,
    desc: &FunctionDescriptor,
    cumulative: u8,
    config: &Config,
) -> Result<FunctionHandler, Error<T::Error>> {
    let interrupts = InterruptAssignment::new(cumulative, desc.intr_src_count)?;
    let base = desc.addresses();
    let kind = match desc.number {
        function::TOUCH_2D_LEGACY => FunctionKind::Touch2dLegacy(F11::init(bus, base, &config.orientation)?),
        function::TOUCH_2D => FunctionKind::Touch2d(F12::init(bus, base, config)?),
        _ => FunctionKind::Buttons(F1a::init(bus, base, config)?),
    };
    Ok(FunctionHandler {
        number: desc.number,
        version: desc.version,
        base,
        interrupts,
        kind,
    })
}

fn touch_geometry(kind: &FunctionKind) -> Option<SensorGeometry> {
    match kind {
        FunctionKind::Touch2dLegacy(f11) => Some(f11.geometry()),
        FunctionKind::Touch2d(f12) => Some(f12.geometry()),
        _ => None,
    }
}
