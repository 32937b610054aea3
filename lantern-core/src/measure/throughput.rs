use anyhow::{Context as _, bail, ensure};
use logos::{Lexer, Logos};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// The [`Throughput`] of the simulated network link, in bits per second.
///
/// This is the total capacity shared between every connection carrying an
/// in-flight request: the simulator divides it evenly between them at every
/// step.
///
/// # Default
///
/// The [`Default`] throughput is the one of the mobile slow 4G preset, see
/// [`MOBILE_SLOW_4G`](crate::defaults::MOBILE_SLOW_4G).
///
/// # Example
///
/// ```
/// # use lantern_core::measure::Throughput;
/// let throughput: Throughput = "10mbps".parse().unwrap();
///
/// assert_eq!(throughput.bits_per_sec(), 10 * 1_024 * 1_024);
/// assert_eq!(throughput.to_string(), "10mbps");
/// ```
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Throughput(u64);

impl Throughput {
    /// create a new [`Throughput`] from a number of bits per second.
    pub const fn new(bits_per_sec: u64) -> Self {
        Self(bits_per_sec)
    }

    /// create a new [`Throughput`] from a number of kilobits (1024 bits)
    /// per second, saturating at [`u64::MAX`] bits per second.
    pub const fn from_kbps(kbps: u64) -> Self {
        Self(kbps.saturating_mul(K))
    }

    #[inline]
    pub fn bits_per_sec(&self) -> u64 {
        self.0
    }

    /// Returns how many bytes can be transferred in one millisecond.
    ///
    /// ```
    /// # use lantern_core::measure::Throughput;
    /// let throughput = Throughput::new(8_000);
    /// assert_eq!(throughput.bytes_per_ms(), 1.0);
    /// ```
    #[inline]
    pub fn bytes_per_ms(&self) -> f64 {
        self.0 as f64 / 8.0 / 1_000.0
    }
}

impl Default for Throughput {
    fn default() -> Self {
        crate::defaults::MOBILE_SLOW_4G.throughput
    }
}

const K: u64 = 1_024;
const M: u64 = 1_024 * 1_024;
const G: u64 = 1_024 * 1_024 * 1_024;

impl fmt::Display for Throughput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;

        if v < K || v % K != 0 {
            write!(f, "{v}bps")
        } else if v < M || v % M != 0 {
            write!(f, "{}kbps", v / K)
        } else if v < G || v % G != 0 {
            write!(f, "{}mbps", v / M)
        } else {
            write!(f, "{}gbps", v / G)
        }
    }
}

#[derive(Logos, Debug, PartialEq)]
#[logos(skip r"[ \t\n\f]+")]
enum ThroughputToken {
    #[token("bps")]
    Bps,
    #[token("kbps")]
    Kbps,
    #[token("mbps")]
    Mbps,
    #[token("gbps")]
    Gbps,

    #[regex("[0-9]+")]
    Value,
}

impl FromStr for Throughput {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut lex = Lexer::<'_, ThroughputToken>::new(s);

        let Some(Ok(ThroughputToken::Value)) = lex.next() else {
            bail!("Expecting to parse a number")
        };
        let number: u64 = lex.slice().parse()?;
        let Some(Ok(token)) = lex.next() else {
            bail!("Expecting to parse a unit")
        };
        let multiplier = match token {
            ThroughputToken::Bps => 1,
            ThroughputToken::Kbps => K,
            ThroughputToken::Mbps => M,
            ThroughputToken::Gbps => G,
            ThroughputToken::Value => bail!("Expecting to parse a unit (bps, kbps, ...)"),
        };
        let bps = number
            .checked_mul(multiplier)
            .with_context(|| format!("Throughput overflows: {s}"))?;

        ensure!(
            lex.next().is_none(),
            "Not expecting any other tokens to parse a throughput"
        );

        Ok(Self::new(bps))
    }
}

impl TryFrom<String> for Throughput {
    type Error = anyhow::Error;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Throughput> for String {
    fn from(value: Throughput) -> Self {
        value.to_string()
    }
}
