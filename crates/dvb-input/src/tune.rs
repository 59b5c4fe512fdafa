//! Tune descriptors: delivery systems, parameter enums carrying their
//! kernel discriminants, and the per-system tune command.

use strum::EnumString;

/// Delivery system selector (the required `type` option).
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum DeliverySystem {
    S,
    S2,
    T,
    T2,
    C,
}

/// Transponder polarization. `H`/`L` select horizontal/left circular,
/// `V`/`R` vertical/right circular.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Polarization {
    #[strum(serialize = "H", serialize = "L")]
    Horizontal,
    #[strum(serialize = "V", serialize = "R")]
    Vertical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[repr(u32)]
#[strum(ascii_case_insensitive)]
pub enum Modulation {
    #[strum(serialize = "QPSK")]
    Qpsk = 0,
    #[strum(serialize = "QAM16")]
    Qam16 = 1,
    #[strum(serialize = "QAM32")]
    Qam32 = 2,
    #[strum(serialize = "QAM64")]
    Qam64 = 3,
    #[strum(serialize = "QAM128")]
    Qam128 = 4,
    #[strum(serialize = "QAM256")]
    Qam256 = 5,
    #[strum(serialize = "AUTO")]
    Auto = 6,
    #[strum(serialize = "VSB8")]
    Vsb8 = 7,
    #[strum(serialize = "VSB16")]
    Vsb16 = 8,
    #[strum(serialize = "PSK8")]
    Psk8 = 9,
    #[strum(serialize = "APSK16")]
    Apsk16 = 10,
    #[strum(serialize = "APSK32")]
    Apsk32 = 11,
    #[strum(serialize = "DQPSK")]
    Dqpsk = 12,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[repr(u32)]
#[strum(ascii_case_insensitive)]
pub enum CodeRate {
    #[strum(serialize = "NONE")]
    None = 0,
    #[strum(serialize = "1/2")]
    Fec12 = 1,
    #[strum(serialize = "2/3")]
    Fec23 = 2,
    #[strum(serialize = "3/4")]
    Fec34 = 3,
    #[strum(serialize = "4/5")]
    Fec45 = 4,
    #[strum(serialize = "5/6")]
    Fec56 = 5,
    #[strum(serialize = "6/7")]
    Fec67 = 6,
    #[strum(serialize = "7/8")]
    Fec78 = 7,
    #[strum(serialize = "8/9")]
    Fec89 = 8,
    #[strum(serialize = "AUTO")]
    Auto = 9,
    #[strum(serialize = "3/5")]
    Fec35 = 10,
    #[strum(serialize = "9/10")]
    Fec910 = 11,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[repr(u32)]
#[strum(ascii_case_insensitive)]
pub enum Rolloff {
    #[strum(serialize = "35")]
    R35 = 0,
    #[strum(serialize = "20")]
    R20 = 1,
    #[strum(serialize = "25")]
    R25 = 2,
    #[strum(serialize = "AUTO")]
    Auto = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[repr(u32)]
#[strum(ascii_case_insensitive)]
pub enum Bandwidth {
    #[strum(serialize = "8MHZ")]
    B8Mhz = 0,
    #[strum(serialize = "7MHZ")]
    B7Mhz = 1,
    #[strum(serialize = "6MHZ")]
    B6Mhz = 2,
    #[strum(serialize = "AUTO")]
    Auto = 3,
}

impl Bandwidth {
    /// Bandwidth in Hz for the DVBv5 property API; auto falls back to
    /// the 8 MHz default.
    pub fn hz(self) -> u32 {
        match self {
            Bandwidth::B7Mhz => 7_000_000,
            Bandwidth::B6Mhz => 6_000_000,
            Bandwidth::B8Mhz | Bandwidth::Auto => 8_000_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[repr(u32)]
#[strum(ascii_case_insensitive)]
pub enum GuardInterval {
    #[strum(serialize = "1/32")]
    G132 = 0,
    #[strum(serialize = "1/16")]
    G116 = 1,
    #[strum(serialize = "1/8")]
    G18 = 2,
    #[strum(serialize = "1/4")]
    G14 = 3,
    #[strum(serialize = "AUTO")]
    Auto = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[repr(u32)]
#[strum(ascii_case_insensitive)]
pub enum TransmitMode {
    #[strum(serialize = "2K")]
    T2k = 0,
    #[strum(serialize = "8K")]
    T8k = 1,
    #[strum(serialize = "AUTO")]
    Auto = 2,
    #[strum(serialize = "4K")]
    T4k = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[repr(u32)]
#[strum(ascii_case_insensitive)]
pub enum Hierarchy {
    #[strum(serialize = "NONE")]
    None = 0,
    #[strum(serialize = "1")]
    H1 = 1,
    #[strum(serialize = "2")]
    H2 = 2,
    #[strum(serialize = "4")]
    H4 = 3,
    #[strum(serialize = "AUTO")]
    Auto = 4,
}

/// LNB voltage selection (`fe_sec_voltage`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SecVoltage {
    V13 = 0,
    V18 = 1,
    Off = 2,
}

/// 22 kHz tone selection (`fe_sec_tone_mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SecTone {
    On = 0,
    Off = 1,
}

/// DiSEqC mini burst (`fe_sec_mini_cmd`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SecMiniCmd {
    A = 0,
    B = 1,
}

/// Universal LNB local oscillator profile, all in kHz.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LnbProfile {
    pub lof1: u32,
    pub lof2: u32,
    pub slof: u32,
}

/// Resolved band selection for a satellite transponder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SatBand {
    pub hiband: bool,
    /// Intermediate frequency after LOF subtraction, kHz.
    pub intermediate_frequency: u32,
}

/// Satellite tune parameters (DVB-S and DVB-S2), frequencies in kHz,
/// symbol rate in symbols/s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SatParams {
    pub frequency: u32,
    pub polarization: Polarization,
    pub symbol_rate: u32,
    pub fec: CodeRate,
    pub modulation: Modulation,
    pub rolloff: Rolloff,
    pub lnb: LnbProfile,
    pub lnb_sharing: bool,
    /// DiSEqC switch port 1..=4, or 0 when no switch is present.
    pub diseqc: u8,
}

impl SatParams {
    /// LNB band selection: high band applies when a switch frequency
    /// and a high-band LOF are configured and the transponder is above
    /// the switch point.
    pub fn band(&self) -> SatBand {
        let hiband = self.lnb.slof > 0 && self.lnb.lof2 > 0 && self.frequency > self.lnb.slof;
        let intermediate_frequency = if hiband {
            self.frequency - self.lnb.lof2
        } else if self.frequency >= self.lnb.lof1 {
            self.frequency - self.lnb.lof1
        } else {
            self.lnb.lof1 - self.frequency
        };
        SatBand {
            hiband,
            intermediate_frequency,
        }
    }
}

/// Terrestrial tune parameters (DVB-T and DVB-T2), frequency in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerrParams {
    pub frequency: u32,
    pub modulation: Modulation,
    pub bandwidth: Bandwidth,
    pub guard_interval: GuardInterval,
    pub transmit_mode: TransmitMode,
    pub hierarchy: Hierarchy,
}

/// Cable tune parameters (DVB-C), frequency in Hz, symbol rate in
/// symbols/s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CableParams {
    pub frequency: u32,
    pub symbol_rate: u32,
    pub fec: CodeRate,
    pub modulation: Modulation,
}

/// Per-delivery-system tune command held by the frontend worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuneCommand {
    S(SatParams),
    S2(SatParams),
    T(TerrParams),
    T2(TerrParams),
    C(CableParams),
}

impl TuneCommand {
    pub fn delivery(&self) -> DeliverySystem {
        match self {
            TuneCommand::S(_) => DeliverySystem::S,
            TuneCommand::S2(_) => DeliverySystem::S2,
            TuneCommand::T(_) => DeliverySystem::T,
            TuneCommand::T2(_) => DeliverySystem::T2,
            TuneCommand::C(_) => DeliverySystem::C,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_enum_spellings() {
        assert_eq!(Modulation::from_str("QAM64").unwrap(), Modulation::Qam64);
        assert_eq!(Modulation::from_str("qpsk").unwrap(), Modulation::Qpsk);
        assert_eq!(CodeRate::from_str("3/4").unwrap(), CodeRate::Fec34);
        assert_eq!(CodeRate::from_str("AUTO").unwrap(), CodeRate::Auto);
        assert_eq!(Rolloff::from_str("35").unwrap(), Rolloff::R35);
        assert_eq!(Bandwidth::from_str("8MHz").unwrap(), Bandwidth::B8Mhz);
        assert_eq!(Hierarchy::from_str("NONE").unwrap(), Hierarchy::None);
        assert_eq!(Polarization::from_str("L").unwrap(), Polarization::Horizontal);
        assert_eq!(Polarization::from_str("R").unwrap(), Polarization::Vertical);
        assert!(Modulation::from_str("QAM1024").is_err());
    }

    #[test]
    fn test_kernel_discriminants() {
        assert_eq!(Modulation::Qam256 as u32, 5);
        assert_eq!(CodeRate::Fec910 as u32, 11);
        assert_eq!(GuardInterval::Auto as u32, 4);
        assert_eq!(TransmitMode::T4k as u32, 3);
        assert_eq!(SecVoltage::Off as u32, 2);
        assert_eq!(SecTone::On as u32, 0);
    }

    fn sat(frequency: u32, lnb: LnbProfile) -> SatParams {
        SatParams {
            frequency,
            polarization: Polarization::Horizontal,
            symbol_rate: 27_500_000,
            fec: CodeRate::Auto,
            modulation: Modulation::Auto,
            rolloff: Rolloff::R35,
            lnb,
            lnb_sharing: false,
            diseqc: 0,
        }
    }

    #[test]
    fn test_band_selection_universal_lnb() {
        let lnb = LnbProfile {
            lof1: 9_750_000,
            lof2: 10_600_000,
            slof: 11_700_000,
        };
        let low = sat(11_000_000, lnb).band();
        assert!(!low.hiband);
        assert_eq!(low.intermediate_frequency, 1_250_000);

        let high = sat(12_200_000, lnb).band();
        assert!(high.hiband);
        assert_eq!(high.intermediate_frequency, 1_600_000);
    }

    #[test]
    fn test_band_selection_single_lof() {
        let lnb = LnbProfile {
            lof1: 10_600_000,
            lof2: 0,
            slof: 0,
        };
        let band = sat(11_727_000, lnb).band();
        assert!(!band.hiband);
        assert_eq!(band.intermediate_frequency, 1_127_000);

        // C-band style: transponder below the LOF
        let below = sat(3_800_000, LnbProfile {
            lof1: 5_150_000,
            lof2: 0,
            slof: 0,
        })
        .band();
        assert!(!below.hiband);
        assert_eq!(below.intermediate_frequency, 1_350_000);
    }
}
