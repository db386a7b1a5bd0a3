use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::IdError;

/// Base32-sortable alphabet; index order matches numeric order.
const ALPHABET: &[u8; 32] = b"234567abcdefghijklmnopqrstuvwxyz";

/// A 13-character time-ordered record key.
///
/// Layout: 1 zero bit, 53 bits of microseconds since the Unix epoch, 10 bits
/// of per-process clock id. Lexicographic order on the encoded form equals
/// numeric order on the underlying value, so TIDs sort by mint time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tid(String);

/// Microsecond clock that never repeats within a process. Concurrent minters
/// race forward past one another instead of colliding.
static LAST_MICROS: AtomicU64 = AtomicU64::new(0);

fn clock_id() -> u64 {
    static CLOCK_ID: OnceLock<u64> = OnceLock::new();
    *CLOCK_ID.get_or_init(|| rand::random::<u64>() & 0x3ff)
}

fn next_micros() -> u64 {
    let wall = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0);
    let mut prev = LAST_MICROS.load(Ordering::Relaxed);
    loop {
        let candidate = wall.max(prev + 1);
        match LAST_MICROS.compare_exchange_weak(
            prev,
            candidate,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return candidate,
            Err(observed) => prev = observed,
        }
    }
}

fn encode(value: u64) -> String {
    let mut out = [0u8; 13];
    for (i, slot) in out.iter_mut().enumerate() {
        let shift = 60 - 5 * i as u32;
        *slot = ALPHABET[((value >> shift) & 0x1f) as usize];
    }
    // 13 chars cover 65 bits; the top bit is always zero so the first
    // character never exceeds 'j'.
    String::from_utf8_lossy(&out).into_owned()
}

impl Tid {
    /// Mint a fresh TID, strictly greater than any previously minted by this
    /// process.
    pub fn now() -> Self {
        let micros = next_micros() & 0x001f_ffff_ffff_ffff;
        Self(encode((micros << 10) | clock_id()))
    }

    pub fn parse(s: &str) -> Result<Self, IdError> {
        let ok = s.len() == 13
            && s.bytes().all(|b| ALPHABET.contains(&b))
            && ALPHABET
                .iter()
                .position(|&a| a == s.as_bytes()[0])
                .is_some_and(|idx| idx < 16);
        if ok {
            Ok(Self(s.to_owned()))
        } else {
            Err(IdError::InvalidTid(s.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Tid {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Tid {
    type Error = IdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Tid> for String {
    fn from(tid: Tid) -> Self {
        tid.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_tids_are_strictly_increasing() {
        let mut prev = Tid::now();
        for _ in 0..1000 {
            let next = Tid::now();
            assert!(next > prev, "{next} not greater than {prev}");
            prev = next;
        }
    }

    #[test]
    fn encoded_form_is_thirteen_sortable_chars() {
        let tid = Tid::now();
        assert_eq!(tid.as_str().len(), 13);
        assert!(Tid::parse(tid.as_str()).is_ok());
    }

    #[test]
    fn parse_rejects_wrong_shapes() {
        for bad in ["", "short", "3jzfcijpj2z2aa", "1jzfcijpj2z2a", "3jzfcijpj2z2A"] {
            assert!(Tid::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn lexicographic_order_matches_mint_order() {
        let a = Tid::now();
        let b = Tid::now();
        assert!(a.as_str() < b.as_str());
    }
}
