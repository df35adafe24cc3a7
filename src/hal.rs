//! ==============================================================================
//! hal.rs - Hardware Abstraction Layer
//! ==============================================================================
//!
//! purpose:
//!     provides a unified interface for the node's physical i/o:
//!     - dht22 temperature/humidity sensor
//!     - pir motion input
//!     - ac indicator output (relay proxy led)
//!     - 12-bit adc channels (gas sensor, two potentiometers)
//!     abstracts away the difference between running on a real Raspberry Pi
//!     (using `rppal`) and a development machine (using the mock).
//!
//! design philosophy:
//!     - "Compile Anywhere": the node builds and runs on any host with the mock.
//!     - "Hardware behind a feature": `--features hardware` pulls in rppal.
//!     - the mock doubles as the test fixture: inputs are settable and every
//!       output write is recorded.
//!
//! relationships:
//!     - used by: sensors.rs (sampling), node.rs (actuator output)
//!     - uses: rppal (on feature="hardware")
//!     - uses: std::process::Command (python DHT driver, timing-sensitive)
//!
//! ==============================================================================

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub trait HardwareProvider: Send + Sync {
    /// (temperature celsius, relative humidity). may return NaN on a bad frame.
    fn read_dht22(&self, pin: u8) -> Result<(f64, f64)>;
    /// raw 12-bit conversion, 0..=4095
    fn read_adc(&self, channel: u8) -> Result<u16>;
    fn read_motion(&self, pin: u8) -> Result<bool>;
    fn write_gpio(&self, pin: u8, level: bool) -> Result<()>;
}

// ==============================================================================================
// MOCK IMPLEMENTATION (For Non-Hardware Build and Tests)
// ==============================================================================================

#[derive(Debug)]
struct MockInputs {
    climate: std::result::Result<(f64, f64), String>,
    adc: HashMap<u8, u16>,
    motion: bool,
    outputs: HashMap<u8, bool>,
    writes: Vec<(u8, bool)>,
}

#[cfg_attr(feature = "hardware", allow(dead_code))]
pub struct MockHal {
    inner: Mutex<MockInputs>,
}

#[cfg_attr(feature = "hardware", allow(dead_code))]
impl MockHal {
    pub fn new() -> Self {
        tracing::info!("Using MOCK HAL (No hardware access)");
        Self {
            inner: Mutex::new(MockInputs {
                climate: Ok((25.0, 50.0)),
                adc: HashMap::new(),
                motion: false,
                outputs: HashMap::new(),
                writes: Vec::new(),
            }),
        }
    }

    fn inputs(&self) -> MutexGuard<'_, MockInputs> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
impl MockHal {
    pub fn set_climate(&self, reading: std::result::Result<(f64, f64), String>) {
        self.inputs().climate = reading;
    }

    pub fn set_adc(&self, channel: u8, raw: u16) {
        self.inputs().adc.insert(channel, raw);
    }

    pub fn set_motion(&self, level: bool) {
        self.inputs().motion = level;
    }

    /// last level written to `pin`, None if never written
    pub fn output(&self, pin: u8) -> Option<bool> {
        self.inputs().outputs.get(&pin).copied()
    }

    /// every write in order
    pub fn writes(&self) -> Vec<(u8, bool)> {
        self.inputs().writes.clone()
    }
}

impl Default for MockHal {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareProvider for MockHal {
    fn read_dht22(&self, pin: u8) -> Result<(f64, f64)> {
        tracing::debug!("[MOCK DHT22] Reading pin {}", pin);
        self.inputs().climate.clone().map_err(|e| anyhow!(e))
    }

    fn read_adc(&self, channel: u8) -> Result<u16> {
        // unset channels sit at mid-scale
        Ok(self.inputs().adc.get(&channel).copied().unwrap_or(2048))
    }

    fn read_motion(&self, _pin: u8) -> Result<bool> {
        Ok(self.inputs().motion)
    }

    fn write_gpio(&self, pin: u8, level: bool) -> Result<()> {
        tracing::debug!("[MOCK GPIO] Pin {} write {}", pin, level);
        let mut inputs = self.inputs();
        inputs.outputs.insert(pin, level);
        inputs.writes.push((pin, level));
        Ok(())
    }
}

// ==============================================================================================
// REAL IMPLEMENTATION (For Raspberry Pi)
// ==============================================================================================
#[cfg(feature = "hardware")]
pub struct PiHal {}

#[cfg(feature = "hardware")]
impl PiHal {
    pub fn new() -> Self {
        tracing::info!("Using REAL HARDWARE HAL (rppal)");
        Self {}
    }
}

#[cfg(feature = "hardware")]
impl HardwareProvider for PiHal {
    fn read_dht22(&self, pin: u8) -> Result<(f64, f64)> {
        // NOTE: python subprocess for DHT22 stability on generic Linux kernels,
        // native bit-banging is notoriously flaky without a kernel driver.
        use std::process::Command;
        let script = format!(
            r#"
import adafruit_dht, board, json, sys
try:
    dht = adafruit_dht.DHT22(board.D{})
    try:
        print(json.dumps({{"t": dht.temperature, "h": dht.humidity}}))
    finally:
        dht.exit()
except Exception:
    print("null")
"#,
            pin
        );
        let output = Command::new("python3").args(["-c", &script]).output()?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim() == "null" || stdout.trim().is_empty() {
            anyhow::bail!("DHT22 read failed");
        }
        let v: serde_json::Value = serde_json::from_str(stdout.trim())?;
        // a null field is a bad frame, surfaced as NaN like the C driver does
        Ok((
            v["t"].as_f64().unwrap_or(f64::NAN),
            v["h"].as_f64().unwrap_or(f64::NAN),
        ))
    }

    fn read_adc(&self, channel: u8) -> Result<u16> {
        use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
        if channel > 7 {
            anyhow::bail!("MCP3208 has no channel {}", channel);
        }
        let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, 1_000_000, Mode::Mode0)?;
        // start bit + single-ended + 3 channel bits, result in the low 12 bits
        let write = [0x06 | (channel >> 2), (channel & 0x03) << 6, 0x00];
        let mut read = [0u8; 3];
        spi.transfer(&mut read, &write)?;
        Ok((u16::from(read[1] & 0x0F) << 8) | u16::from(read[2]))
    }

    fn read_motion(&self, pin: u8) -> Result<bool> {
        use rppal::gpio::Gpio;
        let gpio = Gpio::new()?;
        Ok(gpio.get(pin)?.into_input().is_high())
    }

    fn write_gpio(&self, pin: u8, level: bool) -> Result<()> {
        use rppal::gpio::Gpio;
        let gpio = Gpio::new()?;
        let mut p = gpio.get(pin)?.into_output();
        // CRITICAL: Prevent GPIO from resetting when dropped
        // Without this, the AC indicator turns off as soon as this function returns
        p.set_reset_on_drop(false);
        p.write(level.into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_records_writes_in_order() {
        let hal = MockHal::new();
        assert_eq!(hal.output(26), None);
        hal.write_gpio(26, true).unwrap();
        hal.write_gpio(26, false).unwrap();
        assert_eq!(hal.output(26), Some(false));
        assert_eq!(hal.writes(), vec![(26, true), (26, false)]);
    }

    #[test]
    fn mock_adc_defaults_to_mid_scale() {
        let hal = MockHal::new();
        assert_eq!(hal.read_adc(5).unwrap(), 2048);
        hal.set_adc(5, 17);
        assert_eq!(hal.read_adc(5).unwrap(), 17);
    }

    #[test]
    fn mock_climate_error_surfaces() {
        let hal = MockHal::new();
        hal.set_climate(Err("timeout".to_string()));
        let err = hal.read_dht22(4).unwrap_err();
        assert_eq!(err.to_string(), "timeout");
    }
}
