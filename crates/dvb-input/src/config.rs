//! DVB input configuration and its translation into a tune command.
//!
//! Units follow the adapter conventions: satellite frequencies are
//! given in MHz and carried in kHz, terrestrial and cable frequencies
//! are given in MHz and carried in Hz, symbol rates are given in
//! ksym/s and carried in sym/s, LNB oscillator frequencies are given
//! in MHz and carried in kHz.

use std::str::FromStr;

use serde::Deserialize;

use crate::error::DvbError;
use crate::tune::{
    Bandwidth, CableParams, CodeRate, DeliverySystem, GuardInterval, Hierarchy, LnbProfile,
    Modulation, Polarization, Rolloff, SatParams, TerrParams, TransmitMode, TuneCommand,
};

/// Raw configuration for one DVB input. Unknown keys are ignored so
/// the same table can carry options for the surrounding pipeline.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DvbConfig {
    /// Delivery system (required).
    #[serde(rename = "type")]
    pub delivery: Option<String>,

    #[serde(default)]
    pub adapter: u32,
    #[serde(default)]
    pub device: u32,

    /// Full-band mode: one filter for PID 8192 instead of per-PID
    /// filters.
    #[serde(default)]
    pub budget: bool,

    /// DVR kernel ring buffer size in 4 KiB units, 0 for the driver
    /// default.
    #[serde(default)]
    pub buffer_size: u32,

    /// Frequency in MHz (all systems).
    #[serde(default)]
    pub frequency: u32,

    /// Satellite shorthand `"freq:pol:symrate"`.
    #[serde(default)]
    pub tp: Option<String>,
    #[serde(default)]
    pub polarization: Option<String>,
    /// Symbol rate in ksym/s (satellite and cable).
    #[serde(default)]
    pub symbolrate: u32,

    /// LNB shorthand `"lof1:lof2:slof"` in MHz.
    #[serde(default)]
    pub lnb: Option<String>,
    #[serde(default)]
    pub lof1: u32,
    #[serde(default)]
    pub lof2: u32,
    #[serde(default)]
    pub slof: u32,
    /// Shared LNB: never power or signal the LNB from this tuner.
    #[serde(default)]
    pub lnb_sharing: bool,

    /// DiSEqC committed switch port 1..=4, 0 for none.
    #[serde(default)]
    pub diseqc: u8,

    #[serde(default)]
    pub modulation: Option<String>,
    #[serde(default)]
    pub fec: Option<String>,
    #[serde(default)]
    pub rolloff: Option<String>,
    #[serde(default)]
    pub bandwidth: Option<String>,
    #[serde(default)]
    pub guardinterval: Option<String>,
    #[serde(default)]
    pub transmitmode: Option<String>,
    #[serde(default)]
    pub hierarchy: Option<String>,
}

fn parse_option<T: FromStr>(
    field: &'static str,
    value: &Option<String>,
    default: T,
) -> Result<T, DvbError> {
    match value {
        None => Ok(default),
        Some(text) => T::from_str(text)
            .map_err(|_| DvbError::Config(format!("unknown {field} \"{text}\""))),
    }
}

/// Split the `"freq:pol:symrate"` shorthand; missing fields stay 0.
fn split_tp(text: &str) -> (u32, Option<char>, u32) {
    let mut parts = text.splitn(3, ':');
    let frequency = parts
        .next()
        .and_then(|p| p.trim().parse::<u32>().ok())
        .unwrap_or(0);
    let polarization = parts.next().and_then(|p| p.trim().chars().next());
    let symbol_rate = parts
        .next()
        .and_then(|p| p.trim().parse::<u32>().ok())
        .unwrap_or(0);
    (frequency, polarization, symbol_rate)
}

impl DvbConfig {
    /// Validate and convert into a tune command. Any inconsistency is
    /// a configuration error, fatal at open.
    pub fn tune(&self) -> Result<TuneCommand, DvbError> {
        let delivery = match &self.delivery {
            Some(text) => DeliverySystem::from_str(text)
                .map_err(|_| DvbError::Config(format!("unknown dvb type \"{text}\"")))?,
            None => return Err(DvbError::config("missing required option \"type\"")),
        };

        let modulation = parse_option("modulation", &self.modulation, Modulation::Auto)?;
        let fec = parse_option("fec", &self.fec, CodeRate::Auto)?;

        match delivery {
            DeliverySystem::S | DeliverySystem::S2 => {
                let (frequency, polarization, symbol_rate) = self.satellite_transponder()?;
                let lnb = self.lnb_profile()?;
                if self.diseqc > 4 {
                    return Err(DvbError::Config(format!(
                        "diseqc port {} out of range (0..=4)",
                        self.diseqc
                    )));
                }
                let rolloff = if delivery == DeliverySystem::S2 {
                    parse_option("rolloff", &self.rolloff, Rolloff::R35)?
                } else {
                    Rolloff::R35
                };
                let params = SatParams {
                    frequency,
                    polarization,
                    symbol_rate,
                    fec,
                    modulation,
                    rolloff,
                    lnb,
                    lnb_sharing: self.lnb_sharing,
                    diseqc: self.diseqc,
                };
                Ok(match delivery {
                    DeliverySystem::S => TuneCommand::S(params),
                    _ => TuneCommand::S2(params),
                })
            }
            DeliverySystem::T | DeliverySystem::T2 => {
                if self.frequency == 0 {
                    return Err(DvbError::config("missing required option \"frequency\""));
                }
                let params = TerrParams {
                    frequency: self.frequency * 1_000_000,
                    modulation,
                    bandwidth: parse_option("bandwidth", &self.bandwidth, Bandwidth::Auto)?,
                    guard_interval: parse_option(
                        "guardinterval",
                        &self.guardinterval,
                        GuardInterval::Auto,
                    )?,
                    transmit_mode: parse_option(
                        "transmitmode",
                        &self.transmitmode,
                        TransmitMode::Auto,
                    )?,
                    hierarchy: parse_option("hierarchy", &self.hierarchy, Hierarchy::Auto)?,
                };
                Ok(match delivery {
                    DeliverySystem::T => TuneCommand::T(params),
                    _ => TuneCommand::T2(params),
                })
            }
            DeliverySystem::C => {
                if self.frequency == 0 {
                    return Err(DvbError::config("missing required option \"frequency\""));
                }
                if self.symbolrate == 0 {
                    return Err(DvbError::config("missing required option \"symbolrate\""));
                }
                Ok(TuneCommand::C(CableParams {
                    frequency: self.frequency * 1_000_000,
                    symbol_rate: self.symbolrate * 1000,
                    fec,
                    modulation,
                }))
            }
        }
    }

    /// Frequency (kHz), polarization and symbol rate (sym/s), either
    /// from the `tp` shorthand or from the individual options.
    fn satellite_transponder(&self) -> Result<(u32, Polarization, u32), DvbError> {
        if let Some(tp) = &self.tp {
            let (freq_mhz, pol_char, symrate_ksym) = split_tp(tp);
            let polarization = match pol_char.map(|c| c.to_ascii_uppercase()) {
                Some('V') | Some('R') => Polarization::Vertical,
                Some(_) => Polarization::Horizontal,
                None => Polarization::Horizontal,
            };
            if freq_mhz == 0 || symrate_ksym == 0 {
                return Err(DvbError::Config(format!(
                    "failed to parse tp option \"{tp}\""
                )));
            }
            return Ok((freq_mhz * 1000, polarization, symrate_ksym * 1000));
        }

        if self.frequency == 0 {
            return Err(DvbError::config("missing required option \"frequency\""));
        }
        if self.symbolrate == 0 {
            return Err(DvbError::config("missing required option \"symbolrate\""));
        }
        let polarization = match &self.polarization {
            Some(text) => Polarization::from_str(text)
                .map_err(|_| DvbError::Config(format!("unknown polarization \"{text}\"")))?,
            None => {
                return Err(DvbError::config(
                    "missing required option \"polarization\"",
                ));
            }
        };
        Ok((self.frequency * 1000, polarization, self.symbolrate * 1000))
    }

    /// LNB oscillator profile in kHz, from the `lnb` shorthand or the
    /// individual options. `lof2` and `slof` default to `lof1`.
    fn lnb_profile(&self) -> Result<LnbProfile, DvbError> {
        if let Some(lnb) = &self.lnb {
            let mut parts = lnb.splitn(3, ':');
            let lof1 = parts
                .next()
                .and_then(|p| p.trim().parse::<u32>().ok())
                .unwrap_or(0);
            let lof2 = parts
                .next()
                .and_then(|p| p.trim().parse::<u32>().ok())
                .unwrap_or(0);
            let slof = parts
                .next()
                .and_then(|p| p.trim().parse::<u32>().ok())
                .unwrap_or(0);
            if lof1 == 0 {
                return Err(DvbError::Config(format!(
                    "failed to parse lnb option \"{lnb}\""
                )));
            }
            return Ok(LnbProfile {
                lof1: lof1 * 1000,
                lof2: lof2 * 1000,
                slof: slof * 1000,
            });
        }

        if self.lof1 == 0 {
            return Err(DvbError::config("missing required option \"lof1\""));
        }
        let lof2 = if self.lof2 > 0 { self.lof2 } else { self.lof1 };
        let slof = if self.slof > 0 { self.slof } else { self.lof1 };
        Ok(LnbProfile {
            lof1: self.lof1 * 1000,
            lof2: lof2 * 1000,
            slof: slof * 1000,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_text: &str) -> DvbConfig {
        toml::from_str(toml_text).unwrap()
    }

    #[test]
    fn test_satellite_individual_options() {
        let config = parse(
            r#"
            type = "S2"
            adapter = 1
            frequency = 11727
            polarization = "H"
            symbolrate = 27500
            lof1 = 10600
            diseqc = 1
            "#,
        );
        let TuneCommand::S2(params) = config.tune().unwrap() else {
            panic!("expected S2");
        };
        assert_eq!(params.frequency, 11_727_000);
        assert_eq!(params.polarization, Polarization::Horizontal);
        assert_eq!(params.symbol_rate, 27_500_000);
        assert_eq!(params.lnb.lof1, 10_600_000);
        // lof2/slof default to lof1
        assert_eq!(params.lnb.lof2, 10_600_000);
        assert_eq!(params.lnb.slof, 10_600_000);
        assert_eq!(params.diseqc, 1);
        assert_eq!(params.rolloff, Rolloff::R35);
    }

    #[test]
    fn test_satellite_tp_and_lnb_shorthand() {
        let config = parse(
            r#"
            type = "S"
            tp = "12322:V:27500"
            lnb = "9750:10600:11700"
            "#,
        );
        let TuneCommand::S(params) = config.tune().unwrap() else {
            panic!("expected S");
        };
        assert_eq!(params.frequency, 12_322_000);
        assert_eq!(params.polarization, Polarization::Vertical);
        assert_eq!(params.symbol_rate, 27_500_000);
        assert_eq!(
            params.lnb,
            LnbProfile {
                lof1: 9_750_000,
                lof2: 10_600_000,
                slof: 11_700_000,
            }
        );
        // 12322 > 11700: high band
        assert!(params.band().hiband);
    }

    #[test]
    fn test_terrestrial_units_and_defaults() {
        let config = parse(
            r#"
            type = "T"
            frequency = 498
            bandwidth = "8MHZ"
            "#,
        );
        let TuneCommand::T(params) = config.tune().unwrap() else {
            panic!("expected T");
        };
        assert_eq!(params.frequency, 498_000_000);
        assert_eq!(params.bandwidth, Bandwidth::B8Mhz);
        assert_eq!(params.guard_interval, GuardInterval::Auto);
        assert_eq!(params.transmit_mode, TransmitMode::Auto);
        assert_eq!(params.hierarchy, Hierarchy::Auto);
        assert_eq!(params.modulation, Modulation::Auto);
    }

    #[test]
    fn test_cable_config() {
        let config = parse(
            r#"
            type = "C"
            frequency = 346
            symbolrate = 6875
            modulation = "QAM256"
            fec = "NONE"
            "#,
        );
        let TuneCommand::C(params) = config.tune().unwrap() else {
            panic!("expected C");
        };
        assert_eq!(params.frequency, 346_000_000);
        assert_eq!(params.symbol_rate, 6_875_000);
        assert_eq!(params.modulation, Modulation::Qam256);
        assert_eq!(params.fec, CodeRate::None);
    }

    #[test]
    fn test_unknown_enum_is_config_error() {
        let config = parse(
            r#"
            type = "C"
            frequency = 346
            symbolrate = 6875
            modulation = "QAM1024"
            "#,
        );
        let err = config.tune().unwrap_err();
        assert!(matches!(err, DvbError::Config(_)), "{err}");
    }

    #[test]
    fn test_missing_type_is_config_error() {
        let config = parse("frequency = 11727");
        assert!(matches!(config.tune().unwrap_err(), DvbError::Config(_)));
    }

    #[test]
    fn test_bad_tp_is_config_error() {
        let config = parse(
            r#"
            type = "S"
            tp = "12322"
            lnb = "9750"
            "#,
        );
        assert!(matches!(config.tune().unwrap_err(), DvbError::Config(_)));
    }

    #[test]
    fn test_diseqc_range_checked() {
        let config = parse(
            r#"
            type = "S"
            frequency = 11727
            polarization = "H"
            symbolrate = 27500
            lof1 = 10600
            diseqc = 5
            "#,
        );
        assert!(matches!(config.tune().unwrap_err(), DvbError::Config(_)));
    }
}
