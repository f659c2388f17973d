use std::{error::Error, fmt::Display, num::ParseFloatError, ops::Range, str::FromStr};

/// A closed range of monoisotopic masses in Daltons
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MassRange {
    pub start: f64,
    pub end: f64,
}

impl MassRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, mass: f64) -> bool {
        self.start <= mass && mass <= self.end
    }

    pub fn is_bounded(&self) -> bool {
        self.end.is_finite()
    }
}

impl Default for MassRange {
    fn default() -> Self {
        Self {
            start: 0.0,
            end: f64::INFINITY,
        }
    }
}

#[derive(Debug)]
pub enum MassRangeParseError {
    MalformedStart(ParseFloatError),
    MalformedEnd(ParseFloatError),
    Inverted(f64, f64),
}

impl Display for MassRangeParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MassRangeParseError::MalformedStart(e) => {
                write!(f, "Failed to parse mass range start {e}")
            }
            MassRangeParseError::MalformedEnd(e) => {
                write!(f, "Failed to parse mass range end {e}")
            }
            MassRangeParseError::Inverted(start, end) => {
                write!(f, "Mass range end {end} is less than its start {start}")
            }
        }
    }
}

impl Error for MassRangeParseError {}

fn parse_bound(
    token: Option<&str>,
    default: f64,
    err: fn(ParseFloatError) -> MassRangeParseError,
) -> Result<f64, MassRangeParseError> {
    match token.map(str::trim) {
        None | Some("") => Ok(default),
        Some(s) => s.parse().map_err(err),
    }
}

impl FromStr for MassRange {
    type Err = MassRangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut tokens = if s.contains(':') {
            s.split(':')
        } else if s.contains('-') {
            s.split('-')
        } else {
            s.split(' ')
        };
        let start = parse_bound(tokens.next(), 0.0, MassRangeParseError::MalformedStart)?;
        let end = parse_bound(tokens.next(), f64::INFINITY, MassRangeParseError::MalformedEnd)?;
        if end < start {
            return Err(MassRangeParseError::Inverted(start, end));
        }
        Ok(MassRange { start, end })
    }
}

impl From<Range<f64>> for MassRange {
    fn from(value: Range<f64>) -> Self {
        Self::new(value.start, value.end)
    }
}

impl From<(f64, f64)> for MassRange {
    fn from(value: (f64, f64)) -> Self {
        Self::new(value.0, value.1)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_mass_fromstr() -> Result<(), MassRangeParseError> {
        let t: MassRange = "500.5-".parse()?;
        assert_eq!(t.start, 500.5);
        assert_eq!(t.end, f64::INFINITY);
        assert!(!t.is_bounded());

        let t: MassRange = "-2500".parse()?;
        assert_eq!(t.start, 0.0);
        assert_eq!(t.end, 2500.0);

        let t: MassRange = "400:4000".parse()?;
        assert_eq!(t.start, 400.0);
        assert_eq!(t.end, 4000.0);
        assert!(t.contains(4000.0));
        assert!(!t.contains(399.9));

        let t: MassRange = "-".parse()?;
        assert_eq!(t, MassRange::default());

        let t: MassRange = "300".parse()?;
        assert_eq!(t.start, 300.0);
        assert_eq!(t.end, f64::INFINITY);
        Ok(())
    }

    #[test]
    fn test_mass_fromstr_malformed() {
        assert!(matches!(
            "a-".parse::<MassRange>(),
            Err(MassRangeParseError::MalformedStart(_))
        ));
        assert!(matches!(
            "-b".parse::<MassRange>(),
            Err(MassRangeParseError::MalformedEnd(_))
        ));
        // The start is checked first
        assert!(matches!(
            "a-b".parse::<MassRange>(),
            Err(MassRangeParseError::MalformedStart(_))
        ));
        assert!(matches!(
            "900-100".parse::<MassRange>(),
            Err(MassRangeParseError::Inverted(..))
        ));
    }
}
