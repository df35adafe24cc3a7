//! ==============================================================================
//! sensors.rs - raw hardware values to engineering units
//! ==============================================================================
//!
//! purpose:
//!     one sampling pass over the node's inputs. reads the dht22, the three
//!     adc channels and the pir pin through the HardwareProvider and scales
//!     them into the units the record carries.
//!
//! scaling:
//!     the adc is 12 bit (0..=4095). scaling uses integer linear mapping with
//!     truncating division, so the endpoints land exactly:
//!         gas       0..4095 -> 200..1000 ppm
//!         avg temp  0..4095 -> 1000..4000 hundredths -> 10.00..40.00 C
//!         avg hum   0..4095 -> 2000..9000 hundredths -> 20.00..90.00 %
//!
//! failure policy:
//!     a failed or NaN dht22 read substitutes 0.0 for BOTH values and is
//!     flagged on the sample; there is no retry within the cycle.
//!
//! ==============================================================================

use crate::config::PinsConfig;
use crate::hal::HardwareProvider;

pub const ADC_MAX: u16 = 4095;

/// integer linear interpolation, truncating towards zero
pub fn map_range(x: i64, in_min: i64, in_max: i64, out_min: i64, out_max: i64) -> i64 {
    (x - in_min) * (out_max - out_min) / (in_max - in_min) + out_min
}

fn clamp_adc(raw: u16) -> i64 {
    i64::from(raw.min(ADC_MAX))
}

pub fn gas_ppm(raw: u16) -> f64 {
    map_range(clamp_adc(raw), 0, i64::from(ADC_MAX), 200, 1000) as f64
}

pub fn avg_temperature(raw: u16) -> f64 {
    map_range(clamp_adc(raw), 0, i64::from(ADC_MAX), 1000, 4000) as f64 / 100.0
}

pub fn avg_humidity(raw: u16) -> f64 {
    map_range(clamp_adc(raw), 0, i64::from(ADC_MAX), 2000, 9000) as f64 / 100.0
}

/// everything read from hardware in one cycle, already scaled
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    pub temperature: f64,
    pub humidity: f64,
    /// false when the dht22 values were substituted
    pub climate_ok: bool,
    pub gas_ppm: f64,
    /// instantaneous pir level, before any hold logic
    pub motion: bool,
    pub avg_temp: f64,
    pub avg_hum: f64,
}

pub fn sample<H: HardwareProvider>(hal: &H, pins: &PinsConfig) -> RawSample {
    let (temperature, humidity, climate_ok) = match hal.read_dht22(pins.dht22) {
        Ok((t, h)) if !t.is_nan() && !h.is_nan() => (t, h, true),
        Ok(_) => {
            tracing::warn!("[SENSOR] DHT22 read failed: not a number");
            (0.0, 0.0, false)
        }
        Err(e) => {
            tracing::warn!("[SENSOR] DHT22 read failed: {:#}", e);
            (0.0, 0.0, false)
        }
    };

    RawSample {
        temperature,
        humidity,
        climate_ok,
        gas_ppm: gas_ppm(read_channel(hal, pins.gas_channel, "gas")),
        motion: hal.read_motion(pins.motion).unwrap_or_else(|e| {
            tracing::warn!("[SENSOR] PIR read failed: {:#}", e);
            false
        }),
        avg_temp: avg_temperature(read_channel(hal, pins.avg_temp_channel, "avg temp")),
        avg_hum: avg_humidity(read_channel(hal, pins.avg_hum_channel, "avg hum")),
    }
}

fn read_channel<H: HardwareProvider>(hal: &H, channel: u8, what: &str) -> u16 {
    hal.read_adc(channel).unwrap_or_else(|e| {
        tracing::warn!("[SENSOR] ADC channel {} ({}) read failed: {:#}", channel, what, e);
        0
    })
}
