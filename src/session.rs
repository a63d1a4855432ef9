use bitmask_enum::bitmask;

use crate::Addressing;

/// Session active after power-on and after an S3 timeout.
pub const DEFAULT_SESSION: u8 = 0x01;
pub const PROGRAMMING_SESSION: u8 = 0x02;
pub const EXTENDED_SESSION: u8 = 0x03;
pub const SAFETY_SYSTEM_SESSION: u8 = 0x04;

/// Set of diagnostic sessions a service, DID or security level is reachable
/// from. Bit `n` grants session identifier `n + 1`, so the four ISO-defined
/// sessions map onto the named flags and vendor sessions up to 0x10 fit in
/// the remaining bits.
#[bitmask(u16)]
pub enum SessionMask {
    Default,
    Programming,
    Extended,
    SafetySystem,
}

impl SessionMask {
    /// Every session identifier, vendor sessions included.
    #[must_use]
    pub fn any() -> Self {
        Self::from(u16::MAX)
    }

    #[must_use]
    pub fn allows(self, session: u8) -> bool {
        match session {
            1..=16 => u16::from(self) & (1 << (session - 1)) != 0,
            _ => false,
        }
    }

    /// Mask granting a single session identifier.
    #[must_use]
    pub fn for_session(session: u8) -> Option<Self> {
        match session {
            1..=16 => Some(Self::from(1 << (session - 1))),
            _ => None,
        }
    }
}

/// Set of unlocked security levels a service or DID requires. Bit `n` names
/// level `n + 1`; an empty mask means the item is reachable while locked.
#[bitmask(u8)]
pub enum SecurityMask {
    Level1,
    Level2,
    Level3,
    Level4,
    Level5,
    Level6,
    Level7,
    Level8,
}

impl SecurityMask {
    /// No security requirement at all.
    #[must_use]
    pub fn open() -> Self {
        Self::from(0)
    }

    #[must_use]
    pub fn allows(self, level: u8) -> bool {
        if u8::from(self) == 0 {
            return true;
        }
        match level {
            1..=8 => u8::from(self) & (1 << (level - 1)) != 0,
            _ => false,
        }
    }
}

/// Addressing modes a service accepts requests from.
#[bitmask(u8)]
pub enum AddressingMask {
    Physical,
    Functional,
}

impl AddressingMask {
    /// Both physical and functional addressing.
    #[must_use]
    pub fn any() -> Self {
        Self::Physical | Self::Functional
    }

    #[must_use]
    pub fn allows(self, addressing: Addressing) -> bool {
        match addressing {
            Addressing::Physical => self.contains(Self::Physical),
            Addressing::Functional => self.contains(Self::Functional),
        }
    }
}
