use crate::drivers::source::{DioHat, HatBackend, ScanBlock, ScanHat, ScanSetup, ThermocoupleHat};
use crate::drivers::HatError;
use crate::types::BoardKind;
use libloading::{Library, Symbol};
use log::{debug, info};
use once_cell::sync::OnceCell;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::thread;
use std::time::Duration;

const LIBRARY_CANDIDATES: [&str; 2] = ["libdaqhats.so", "/usr/local/lib/libdaqhats.so"];

const TRIG_RISING_EDGE: u8 = 0;
const SOURCE_LOCAL: u8 = 0;
const A_IN_MODE_SE: u8 = 0;
const A_IN_RANGE_BIP_1V: u8 = 3;
const TC_TYPE_T: u8 = 2;
const DIO_DIRECTION: u8 = 0;
const CLOCK_SYNC_POLLS: u32 = 50;

type FnAddr = unsafe extern "C" fn(u8) -> c_int;
type FnSerial = unsafe extern "C" fn(u8, *mut c_char) -> c_int;
type FnAddrU8 = unsafe extern "C" fn(u8, u8) -> c_int;
type FnAddrU8U8 = unsafe extern "C" fn(u8, u8, u8) -> c_int;
type FnScanStartRate = unsafe extern "C" fn(u8, u8, u32, f64, u32) -> c_int;
type FnScanStartClocked = unsafe extern "C" fn(u8, u8, u32, u32) -> c_int;
type FnScanRead = unsafe extern "C" fn(u8, *mut u16, i32, f64, *mut f64, u32, *mut u32) -> c_int;
type FnTcRead = unsafe extern "C" fn(u8, u8, u32, *mut f64) -> c_int;
type FnCjcRead = unsafe extern "C" fn(u8, u8, *mut f64) -> c_int;
type FnReadBit = unsafe extern "C" fn(u8, u8, *mut u8) -> c_int;
type FnAOutAll = unsafe extern "C" fn(u8, u32, *mut f64) -> c_int;
type FnClockWrite = unsafe extern "C" fn(u8, u8, f64) -> c_int;
type FnClockRead = unsafe extern "C" fn(u8, *mut u8, *mut f64, *mut u8) -> c_int;

unsafe fn symbol<T: Copy>(lib: &Library, prefix: &str, name: &str) -> Result<T, HatError> {
    let full = format!("{prefix}_{name}\0");
    let sym: Symbol<T> = lib
        .get(full.as_bytes())
        .map_err(|e| HatError::Library(format!("{prefix}_{name}: {e}")))?;
    Ok(*sym)
}

#[derive(Clone, Copy)]
struct CommonFns {
    open: FnAddr,
    close: FnAddr,
    serial: FnSerial,
}

impl CommonFns {
    unsafe fn load(lib: &Library, prefix: &str) -> Result<Self, HatError> {
        Ok(Self {
            open: symbol(lib, prefix, "open")?,
            close: symbol(lib, prefix, "close")?,
            serial: symbol(lib, prefix, "serial")?,
        })
    }
}

#[derive(Clone, Copy)]
struct ScanFns {
    read: FnScanRead,
    stop: FnAddr,
    cleanup: FnAddr,
}

impl ScanFns {
    unsafe fn load(lib: &Library, prefix: &str) -> Result<Self, HatError> {
        Ok(Self {
            read: symbol(lib, prefix, "a_in_scan_read")?,
            stop: symbol(lib, prefix, "a_in_scan_stop")?,
            cleanup: symbol(lib, prefix, "a_in_scan_cleanup")?,
        })
    }
}

#[derive(Clone, Copy)]
enum ScanStart {
    WithRate(FnScanStartRate),
    Clocked(FnScanStartClocked),
}

#[derive(Clone, Copy)]
enum ScanConfig {
    Mcc118 {
        trigger_mode: FnAddrU8,
    },
    Mcc128 {
        trigger_mode: FnAddrU8,
        mode_write: FnAddrU8,
        range_write: FnAddrU8,
    },
    Mcc172 {
        iepe_config_write: FnAddrU8U8,
        clock_write: FnClockWrite,
        clock_read: FnClockRead,
        trigger_config: FnAddrU8U8,
    },
}

#[derive(Clone, Copy)]
struct Mcc134Fns {
    tc_type_write: FnAddrU8U8,
    a_in_read: FnTcRead,
    cjc_read: FnCjcRead,
}

#[derive(Clone, Copy)]
struct Mcc152Fns {
    dio_reset: FnAddr,
    config_write_port: FnAddrU8U8,
    output_write_port: FnAddrU8,
    output_write_bit: FnAddrU8U8,
    output_read_bit: FnReadBit,
    input_read_bit: FnReadBit,
    a_out_write_all: FnAOutAll,
}

/// Function table resolved from `libdaqhats`.
struct DaqHatsApi {
    #[allow(dead_code)]
    lib: Library,
    common: [CommonFns; 5],
    scan118: (ScanFns, ScanStart, ScanConfig),
    scan128: (ScanFns, ScanStart, ScanConfig),
    scan172: (ScanFns, ScanStart, ScanConfig),
    mcc134: Mcc134Fns,
    mcc152: Mcc152Fns,
}

impl DaqHatsApi {
    fn load() -> Result<Self, HatError> {
        let mut last_err = String::new();
        for candidate in LIBRARY_CANDIDATES {
            // Safety: libdaqhats has no load-time initialisers with side effects.
            match unsafe { Library::new(candidate) } {
                Ok(lib) => {
                    info!("loaded {candidate}");
                    return unsafe { Self::resolve(lib) };
                }
                Err(e) => last_err = format!("{candidate}: {e}"),
            }
        }
        Err(HatError::Library(last_err))
    }

    // Safety: signatures follow the published daqhats C headers.
    unsafe fn resolve(lib: Library) -> Result<Self, HatError> {
        let mut common = Vec::with_capacity(BoardKind::ALL.len());
        for kind in BoardKind::ALL {
            common.push(CommonFns::load(&lib, kind.tag())?);
        }
        let common: [CommonFns; 5] = common
            .try_into()
            .map_err(|_| HatError::Library("board table size mismatch".into()))?;
        let scan118 = (
            ScanFns::load(&lib, "mcc118")?,
            ScanStart::WithRate(symbol(&lib, "mcc118", "a_in_scan_start")?),
            ScanConfig::Mcc118 {
                trigger_mode: symbol(&lib, "mcc118", "trigger_mode")?,
            },
        );
        let scan128 = (
            ScanFns::load(&lib, "mcc128")?,
            ScanStart::WithRate(symbol(&lib, "mcc128", "a_in_scan_start")?),
            ScanConfig::Mcc128 {
                trigger_mode: symbol(&lib, "mcc128", "trigger_mode")?,
                mode_write: symbol(&lib, "mcc128", "a_in_mode_write")?,
                range_write: symbol(&lib, "mcc128", "a_in_range_write")?,
            },
        );
        let scan172 = (
            ScanFns::load(&lib, "mcc172")?,
            ScanStart::Clocked(symbol(&lib, "mcc172", "a_in_scan_start")?),
            ScanConfig::Mcc172 {
                iepe_config_write: symbol(&lib, "mcc172", "iepe_config_write")?,
                clock_write: symbol(&lib, "mcc172", "a_in_clock_config_write")?,
                clock_read: symbol(&lib, "mcc172", "a_in_clock_config_read")?,
                trigger_config: symbol(&lib, "mcc172", "trigger_config")?,
            },
        );
        let mcc134 = Mcc134Fns {
            tc_type_write: symbol(&lib, "mcc134", "tc_type_write")?,
            a_in_read: symbol(&lib, "mcc134", "a_in_read")?,
            cjc_read: symbol(&lib, "mcc134", "cjc_read")?,
        };
        let mcc152 = Mcc152Fns {
            dio_reset: symbol(&lib, "mcc152", "dio_reset")?,
            config_write_port: symbol(&lib, "mcc152", "dio_config_write_port")?,
            output_write_port: symbol(&lib, "mcc152", "dio_output_write_port")?,
            output_write_bit: symbol(&lib, "mcc152", "dio_output_write_bit")?,
            output_read_bit: symbol(&lib, "mcc152", "dio_output_read_bit")?,
            input_read_bit: symbol(&lib, "mcc152", "dio_input_read_bit")?,
            a_out_write_all: symbol(&lib, "mcc152", "a_out_write_all")?,
        };
        Ok(Self {
            lib,
            common,
            scan118,
            scan128,
            scan172,
            mcc134,
            mcc152,
        })
    }

    fn instance() -> Result<&'static DaqHatsApi, HatError> {
        static API: OnceCell<DaqHatsApi> = OnceCell::new();
        API.get_or_try_init(Self::load)
    }

    fn common(&self, kind: BoardKind) -> CommonFns {
        let index = BoardKind::ALL
            .iter()
            .position(|k| *k == kind)
            .unwrap_or_default();
        self.common[index]
    }
}

/// Handle bookkeeping shared by every board type.
struct OpenBoard {
    fns: CommonFns,
    kind: BoardKind,
    address: u8,
    open: bool,
}

impl OpenBoard {
    fn open(api: &DaqHatsApi, kind: BoardKind, address: u8) -> Result<Self, HatError> {
        let fns = api.common(kind);
        HatError::check("open", unsafe { (fns.open)(address) })?;
        debug!("{kind} opened at address {address}");
        Ok(Self {
            fns,
            kind,
            address,
            open: true,
        })
    }

    fn ensure_open(&self) -> Result<(), HatError> {
        if self.open {
            Ok(())
        } else {
            Err(HatError::NotOpen)
        }
    }

    fn serial(&self) -> Result<String, HatError> {
        self.ensure_open()?;
        let mut buffer = [0 as c_char; 16];
        HatError::check("serial", unsafe {
            (self.fns.serial)(self.address, buffer.as_mut_ptr())
        })?;
        // Safety: the driver writes a NUL terminated string of at most 9 bytes.
        let serial = unsafe { CStr::from_ptr(buffer.as_ptr()) };
        Ok(serial.to_string_lossy().into_owned())
    }

    fn close(&mut self) -> Result<(), HatError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        debug!("{} closed at address {}", self.kind, self.address);
        HatError::check("close", unsafe {
            (self.fns.close)(self.address)
        })
    }
}

/// MCC 118 / 128 / 172 scanning board backed by `libdaqhats`.
pub struct HatScanBoard {
    board: OpenBoard,
    scan: ScanFns,
    start: ScanStart,
    config: ScanConfig,
    active_channels: Option<usize>,
}

impl ScanHat for HatScanBoard {
    fn serial(&mut self) -> Result<String, HatError> {
        self.board.serial()
    }

    fn configure(&mut self, setup: &ScanSetup) -> Result<(), HatError> {
        self.board.ensure_open()?;
        let address = self.board.address;
        unsafe {
            match self.config {
                ScanConfig::Mcc118 { trigger_mode } => {
                    HatError::check("mcc118_trigger_mode", trigger_mode(address, TRIG_RISING_EDGE))?;
                }
                ScanConfig::Mcc128 {
                    trigger_mode,
                    mode_write,
                    range_write,
                } => {
                    HatError::check("mcc128_a_in_mode_write", mode_write(address, A_IN_MODE_SE))?;
                    HatError::check(
                        "mcc128_a_in_range_write",
                        range_write(address, A_IN_RANGE_BIP_1V),
                    )?;
                    HatError::check("mcc128_trigger_mode", trigger_mode(address, TRIG_RISING_EDGE))?;
                }
                ScanConfig::Mcc172 {
                    iepe_config_write,
                    clock_write,
                    clock_read,
                    trigger_config,
                } => {
                    for channel in 0..2 {
                        HatError::check("mcc172_iepe_config_write", iepe_config_write(address, channel, 0))?;
                    }
                    HatError::check(
                        "mcc172_a_in_clock_config_write",
                        clock_write(address, SOURCE_LOCAL, setup.rate_hz),
                    )?;
                    let mut synced = false;
                    for _ in 0..CLOCK_SYNC_POLLS {
                        let mut source = 0u8;
                        let mut rate = 0.0f64;
                        let mut sync_flag = 0u8;
                        HatError::check(
                            "mcc172_a_in_clock_config_read",
                            clock_read(address, &mut source, &mut rate, &mut sync_flag),
                        )?;
                        if sync_flag != 0 {
                            synced = true;
                            break;
                        }
                        thread::sleep(Duration::from_millis(100));
                    }
                    if !synced {
                        return Err(HatError::ClockNotSynced {
                            attempts: CLOCK_SYNC_POLLS,
                        });
                    }
                    HatError::check(
                        "mcc172_trigger_config",
                        trigger_config(address, SOURCE_LOCAL, TRIG_RISING_EDGE),
                    )?;
                }
            }
        }
        Ok(())
    }

    fn scan_start(
        &mut self,
        channel_mask: u8,
        samples_per_channel: u32,
        rate_hz: f64,
        options: u32,
    ) -> Result<(), HatError> {
        self.board.ensure_open()?;
        let address = self.board.address;
        let code = unsafe {
            match self.start {
                ScanStart::WithRate(start) => start(address, channel_mask, samples_per_channel, rate_hz, options),
                ScanStart::Clocked(start) => start(address, channel_mask, samples_per_channel, options),
            }
        };
        HatError::check("a_in_scan_start", code)?;
        self.active_channels = Some(channel_mask.count_ones() as usize);
        Ok(())
    }

    fn scan_read(&mut self, samples_per_channel: i32, timeout_s: f64) -> Result<ScanBlock, HatError> {
        self.board.ensure_open()?;
        let channels = self.active_channels.ok_or(HatError::NoScan)?;
        let requested = samples_per_channel.max(0) as usize;
        let mut buffer = vec![0.0f64; requested * channels];
        let mut status = 0u16;
        let mut read_per_channel = 0u32;
        let code = unsafe {
            (self.scan.read)(
                self.board.address,
                &mut status,
                samples_per_channel,
                timeout_s,
                buffer.as_mut_ptr(),
                buffer.len() as u32,
                &mut read_per_channel,
            )
        };
        HatError::check("a_in_scan_read", code)?;
        let read = read_per_channel as usize;
        buffer.truncate(read * channels);
        Ok(ScanBlock {
            status,
            channel_count: channels,
            samples_per_channel: read,
            data: buffer,
        })
    }

    fn scan_stop(&mut self) -> Result<(), HatError> {
        self.board.ensure_open()?;
        HatError::check("a_in_scan_stop", unsafe {
            (self.scan.stop)(self.board.address)
        })
    }

    fn scan_cleanup(&mut self) -> Result<(), HatError> {
        self.board.ensure_open()?;
        self.active_channels = None;
        HatError::check("a_in_scan_cleanup", unsafe {
            (self.scan.cleanup)(self.board.address)
        })
    }

    fn close(&mut self) -> Result<(), HatError> {
        if self.board.open && self.active_channels.is_some() {
            let _ = self.scan_stop();
            let _ = self.scan_cleanup();
        }
        self.board.close()
    }
}

impl Drop for HatScanBoard {
    fn drop(&mut self) {
        let _ = ScanHat::close(self);
    }
}

/// MCC 134 backed by `libdaqhats`.
pub struct HatThermocoupleBoard {
    board: OpenBoard,
    fns: Mcc134Fns,
}

impl ThermocoupleHat for HatThermocoupleBoard {
    fn serial(&mut self) -> Result<String, HatError> {
        self.board.serial()
    }

    fn set_type_t(&mut self, channel: u8) -> Result<(), HatError> {
        self.board.ensure_open()?;
        HatError::check("mcc134_tc_type_write", unsafe {
            (self.fns.tc_type_write)(self.board.address, channel, TC_TYPE_T)
        })
    }

    fn read_voltage(&mut self, channel: u8) -> Result<f64, HatError> {
        self.board.ensure_open()?;
        let mut value = 0.0f64;
        HatError::check("mcc134_a_in_read", unsafe {
            (self.fns.a_in_read)(self.board.address, channel, 0, &mut value)
        })?;
        Ok(value)
    }

    fn read_cjc(&mut self, channel: u8) -> Result<f64, HatError> {
        self.board.ensure_open()?;
        let mut value = 0.0f64;
        HatError::check("mcc134_cjc_read", unsafe {
            (self.fns.cjc_read)(self.board.address, channel, &mut value)
        })?;
        Ok(value)
    }

    fn close(&mut self) -> Result<(), HatError> {
        self.board.close()
    }
}

impl Drop for HatThermocoupleBoard {
    fn drop(&mut self) {
        let _ = self.board.close();
    }
}

/// MCC 152 backed by `libdaqhats`.
pub struct HatDioBoard {
    board: OpenBoard,
    fns: Mcc152Fns,
}

impl DioHat for HatDioBoard {
    fn serial(&mut self) -> Result<String, HatError> {
        self.board.serial()
    }

    fn dio_reset(&mut self) -> Result<(), HatError> {
        self.board.ensure_open()?;
        HatError::check("mcc152_dio_reset", unsafe { (self.fns.dio_reset)(self.board.address) })
    }

    fn dio_set_direction(&mut self, port: u8) -> Result<(), HatError> {
        self.board.ensure_open()?;
        HatError::check("mcc152_dio_config_write_port", unsafe {
            (self.fns.config_write_port)(self.board.address, DIO_DIRECTION, port)
        })
    }

    fn dio_write_port(&mut self, value: u8) -> Result<(), HatError> {
        self.board.ensure_open()?;
        HatError::check("mcc152_dio_output_write_port", unsafe {
            (self.fns.output_write_port)(self.board.address, value)
        })
    }

    fn dio_write_bit(&mut self, bit: u8, value: u8) -> Result<(), HatError> {
        self.board.ensure_open()?;
        HatError::check("mcc152_dio_output_write_bit", unsafe {
            (self.fns.output_write_bit)(self.board.address, bit, value)
        })
    }

    fn dio_read_output_bit(&mut self, bit: u8) -> Result<u8, HatError> {
        self.board.ensure_open()?;
        let mut value = 0u8;
        HatError::check("mcc152_dio_output_read_bit", unsafe {
            (self.fns.output_read_bit)(self.board.address, bit, &mut value)
        })?;
        Ok(value)
    }

    fn dio_read_input_bit(&mut self, bit: u8) -> Result<u8, HatError> {
        self.board.ensure_open()?;
        let mut value = 0u8;
        HatError::check("mcc152_dio_input_read_bit", unsafe {
            (self.fns.input_read_bit)(self.board.address, bit, &mut value)
        })?;
        Ok(value)
    }

    fn a_out_write_all(&mut self, volts: &[f64]) -> Result<(), HatError> {
        self.board.ensure_open()?;
        let mut values = volts.to_vec();
        HatError::check("mcc152_a_out_write_all", unsafe {
            (self.fns.a_out_write_all)(self.board.address, 0, values.as_mut_ptr())
        })
    }

    fn close(&mut self) -> Result<(), HatError> {
        self.board.close()
    }
}

impl Drop for HatDioBoard {
    fn drop(&mut self) {
        let _ = self.board.close();
    }
}

/// Opens boards through the vendor library, loading it on first use.
#[derive(Default)]
pub struct DaqHatsBackend;

impl HatBackend for DaqHatsBackend {
    fn open_scan(&self, kind: BoardKind, address: u8) -> Result<Box<dyn ScanHat>, HatError> {
        let api = DaqHatsApi::instance()?;
        let (scan, start, config) = match kind {
            BoardKind::Mcc118 => api.scan118,
            BoardKind::Mcc128 => api.scan128,
            BoardKind::Mcc172 => api.scan172,
            BoardKind::Mcc134 | BoardKind::Mcc152 => {
                return Err(HatError::Library(format!("{kind} has no scan interface")))
            }
        };
        Ok(Box::new(HatScanBoard {
            board: OpenBoard::open(api, kind, address)?,
            scan,
            start,
            config,
            active_channels: None,
        }))
    }

    fn open_thermocouple(&self, address: u8) -> Result<Box<dyn ThermocoupleHat>, HatError> {
        let api = DaqHatsApi::instance()?;
        Ok(Box::new(HatThermocoupleBoard {
            board: OpenBoard::open(api, BoardKind::Mcc134, address)?,
            fns: api.mcc134,
        }))
    }

    fn open_dio(&self, address: u8) -> Result<Box<dyn DioHat>, HatError> {
        let api = DaqHatsApi::instance()?;
        Ok(Box::new(HatDioBoard {
            board: OpenBoard::open(api, BoardKind::Mcc152, address)?,
            fns: api.mcc152,
        }))
    }
}
