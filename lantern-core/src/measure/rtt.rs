use anyhow::{Context as _, anyhow, bail, ensure};
use logos::{Lexer, Logos};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Duration};

/// The round-trip time of a simulated connection.
///
/// This is the time it takes for a packet to travel from the client to the
/// origin server and for the acknowledgement to come back. Every handshake,
/// every request and every congestion window is paid in multiples of (or
/// halves of) this value.
///
/// # Default [`Rtt`]
///
/// ```
/// # use lantern_core::measure::Rtt;
/// assert_eq!(
///     Rtt::default().to_string(),
///     "150ms"
/// )
/// ```
///
/// # truncation
///
/// The round trip is precise up to the micro seconds. Anything finer is
/// dropped at construction. Durations beyond [`u64::MAX`] micro seconds
/// saturate, use [`Rtt::try_new`] to reject them instead.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rtt(u64);

impl Rtt {
    /// No round trip at all, every exchange is instantaneous.
    pub const ZERO: Self = Self::new(Duration::ZERO);

    /// create a new round-trip time with the given [`Duration`].
    ///
    /// ```
    /// # use lantern_core::measure::Rtt;
    /// # use std::time::Duration;
    /// let rtt = Rtt::new(Duration::from_nanos(987_654_321));
    /// assert_eq!(
    ///     rtt.into_duration(),
    ///     Duration::from_micros(987_654),
    /// );
    /// ```
    #[inline(always)]
    pub const fn new(duration: Duration) -> Self {
        let micros = duration.as_micros();
        if micros > u64::MAX as u128 {
            Self(u64::MAX)
        } else {
            Self(micros as u64)
        }
    }

    /// create a new round-trip time, failing if the duration does not fit
    /// in micro seconds.
    pub fn try_new(duration: Duration) -> anyhow::Result<Self> {
        let micros = u64::try_from(duration.as_micros())
            .with_context(|| format!("Round trip is too long: {duration:?}"))?;
        Ok(Self(micros))
    }

    /// create a new round-trip time from a number of milliseconds,
    /// saturating at [`u64::MAX`] micro seconds.
    #[inline(always)]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000))
    }

    #[inline(always)]
    pub fn into_duration(self) -> Duration {
        Duration::from_micros(self.0)
    }

    /// The round trip in (fractional) milliseconds, the unit the simulator
    /// does all of its arithmetic in.
    #[inline]
    pub fn as_millis_f64(self) -> f64 {
        self.0 as f64 / 1_000.0
    }
}

impl From<Rtt> for Duration {
    fn from(value: Rtt) -> Self {
        value.into_duration()
    }
}

impl From<Duration> for Rtt {
    fn from(value: Duration) -> Self {
        Self::new(value)
    }
}

impl Default for Rtt {
    fn default() -> Self {
        crate::defaults::MOBILE_SLOW_4G.rtt
    }
}

impl fmt::Display for Rtt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0 / 1_000_000;
        let millis = (self.0 / 1_000) % 1_000;
        let micros = self.0 % 1_000;

        if self.0 == 0 {
            return write!(f, "0ms");
        }

        let mut parts = Vec::with_capacity(3);
        if secs > 0 {
            parts.push(format!("{secs}s"));
        }
        if millis > 0 {
            parts.push(format!("{millis}ms"));
        }
        if micros > 0 {
            parts.push(format!("{micros}µs"));
        }
        f.write_str(&parts.join(" "))
    }
}

#[derive(Logos, Debug, PartialEq)]
#[logos(skip r"[ \t\n\f]+")]
enum Token {
    #[regex("us|µs|μs")]
    MicroSeconds,
    #[token("ms")]
    MilliSeconds,
    #[token("s")]
    Seconds,

    #[regex("[0-9]+")]
    Value,
}

impl FromStr for Rtt {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut lex = Lexer::<'_, Token>::new(s);
        let mut total = Duration::ZERO;
        let mut parsed_any = false;

        while let Some(next) = lex.next() {
            let token = next.map_err(|()| anyhow!("Failed to parse round trip: {s}"))?;
            ensure!(
                token == Token::Value,
                "Expecting round trip to start with a number. Cannot parse {s}"
            );
            let number: u64 = lex.slice().parse()?;

            let Some(Ok(unit)) = lex.next() else {
                bail!("Expecting a unit (s, ms, µs), failed to parse: {s}")
            };
            let duration = match unit {
                Token::MicroSeconds => Duration::from_micros(number),
                Token::MilliSeconds => Duration::from_millis(number),
                Token::Seconds => Duration::from_secs(number),
                Token::Value => bail!("Failed to parse `{s}', expecting a unit."),
            };
            total = total
                .checked_add(duration)
                .with_context(|| format!("Round trip overflows: {s}"))?;
            parsed_any = true;
        }

        ensure!(parsed_any, "Cannot parse an empty round trip");

        Self::try_new(total)
    }
}

impl TryFrom<String> for Rtt {
    type Error = anyhow::Error;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Rtt> for String {
    fn from(value: Rtt) -> Self {
        value.to_string()
    }
}
