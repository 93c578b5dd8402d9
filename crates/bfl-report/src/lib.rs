#![forbid(unsafe_code)]
//! Fatal device-error reporting.
//!
//! Devices that can no longer make progress raise one of a fixed set of
//! fatal conditions along with two 32-bit diagnostic words. This crate
//! holds the descriptor table and formats one log line per report.
//! Bounds checking happens at the edge: raw codes enter through
//! [`FatalCode::from_raw`], and everything past that point is infallible —
//! an out-of-range code is the caller's programming error, not a runtime
//! condition handled here.

use std::fmt;

use tracing::error;

/// Fatal device conditions, in wire-code order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FatalCode {
    DmaFault = 0,
    FirmwarePanic = 1,
    OverTemperature = 2,
    MediaFailure = 3,
    BusParity = 4,
    WriteFault = 5,
    PowerLoss = 6,
    InternalAssert = 7,
}

/// Number of defined fatal codes.
pub const FATAL_CODE_COUNT: u32 = 8;

struct FatalDesc {
    name: &'static str,
    detail: &'static str,
}

const DESCRIPTORS: [FatalDesc; FATAL_CODE_COUNT as usize] = [
    FatalDesc {
        name: "DMA_FAULT",
        detail: "DMA engine faulted mid-transfer",
    },
    FatalDesc {
        name: "FIRMWARE_PANIC",
        detail: "device firmware reported an internal panic",
    },
    FatalDesc {
        name: "OVER_TEMPERATURE",
        detail: "thermal shutdown threshold exceeded",
    },
    FatalDesc {
        name: "MEDIA_FAILURE",
        detail: "unrecoverable media error",
    },
    FatalDesc {
        name: "BUS_PARITY",
        detail: "parity error on the host bus",
    },
    FatalDesc {
        name: "WRITE_FAULT",
        detail: "write path failed permanently",
    },
    FatalDesc {
        name: "POWER_LOSS",
        detail: "backup power exhausted or absent",
    },
    FatalDesc {
        name: "INTERNAL_ASSERT",
        detail: "device-internal consistency check failed",
    },
];

impl FatalCode {
    /// Validate a raw wire code. This is the only entry point for
    /// untrusted code values.
    #[must_use]
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::DmaFault),
            1 => Some(Self::FirmwarePanic),
            2 => Some(Self::OverTemperature),
            3 => Some(Self::MediaFailure),
            4 => Some(Self::BusParity),
            5 => Some(Self::WriteFault),
            6 => Some(Self::PowerLoss),
            7 => Some(Self::InternalAssert),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_raw(self) -> u32 {
        self as u32
    }

    fn descriptor(self) -> &'static FatalDesc {
        &DESCRIPTORS[self as usize]
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    #[must_use]
    pub fn detail(self) -> &'static str {
        self.descriptor().detail
    }

    /// Iterate all defined codes in wire order.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..FATAL_CODE_COUNT).filter_map(Self::from_raw)
    }
}

impl fmt::Display for FatalCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The formatted line emitted by [`report_fatal`].
#[must_use]
pub fn format_fatal(code: FatalCode, info1: u32, info2: u32) -> String {
    format!(
        "fatal device error {} ({}): {} [info1={info1:#010x} info2={info2:#010x}]",
        code.as_raw(),
        code.name(),
        code.detail(),
    )
}

/// Emit one structured log line for a fatal device condition.
///
/// The diagnostic words are device-specific and passed through verbatim.
pub fn report_fatal(code: FatalCode, info1: u32, info2: u32) {
    error!(
        code = code.as_raw(),
        name = code.name(),
        info1,
        info2,
        "{}",
        format_fatal(code, info1, info2),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_code_round_trip() {
        for code in FatalCode::all() {
            assert_eq!(FatalCode::from_raw(code.as_raw()), Some(code));
        }
    }

    #[test]
    fn out_of_range_codes_are_refused() {
        assert_eq!(FatalCode::from_raw(FATAL_CODE_COUNT), None);
        assert_eq!(FatalCode::from_raw(u32::MAX), None);
    }

    #[test]
    fn every_code_has_a_descriptor() {
        for code in FatalCode::all() {
            assert!(!code.name().is_empty());
            assert!(!code.detail().is_empty());
        }
        assert_eq!(FatalCode::all().count(), FATAL_CODE_COUNT as usize);
    }

    #[test]
    fn formatted_line_carries_code_and_diagnostics() {
        let line = format_fatal(FatalCode::MediaFailure, 0x0000_0bad, 0xcafe_0000);
        assert_eq!(
            line,
            "fatal device error 3 (MEDIA_FAILURE): unrecoverable media error \
             [info1=0x00000bad info2=0xcafe0000]"
        );
    }

    #[test]
    fn display_uses_the_wire_name() {
        assert_eq!(FatalCode::DmaFault.to_string(), "DMA_FAULT");
        assert_eq!(FatalCode::InternalAssert.to_string(), "INTERNAL_ASSERT");
    }

    #[test]
    fn report_does_not_panic() {
        report_fatal(FatalCode::PowerLoss, 0, u32::MAX);
    }
}
