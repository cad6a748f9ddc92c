use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical length in millimetres, quantized to thousandths so that values
/// read back from a stylesheet compare equal to the ones written into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[derive(Serialize, Deserialize)]
#[serde(from = "f32", into = "f32")]
pub struct Mm(i64);

impl Mm {
    pub const ZERO: Mm = Mm(0);

    pub fn new(value: f32) -> Mm {
        if !value.is_finite() {
            return Mm::ZERO;
        }
        let milli = (value as f64 * 1000.0).round();
        Mm(milli.clamp(i64::MIN as f64, i64::MAX as f64) as i64)
    }

    pub fn from_milli(milli: i64) -> Mm {
        Mm(milli)
    }

    pub fn from_pt(value: f32) -> Mm {
        Mm::new(value * 25.4 / 72.0)
    }

    pub fn from_inches(value: f32) -> Mm {
        Mm::new(value * 25.4)
    }

    pub fn to_f32(self) -> f32 {
        self.0 as f32 / 1000.0
    }

    pub fn to_milli(self) -> i64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Formats the length the way it is written into a stylesheet.
    pub fn to_css(self) -> String {
        if self.0 == 0 {
            return "0".to_string();
        }
        let whole = self.0 / 1000;
        let frac = (self.0 % 1000).abs();
        if frac == 0 {
            return format!("{whole}mm");
        }
        let sign = if self.0 < 0 && whole == 0 { "-" } else { "" };
        let digits = format!("{frac:03}");
        format!("{sign}{whole}.{}mm", digits.trim_end_matches('0'))
    }
}

impl From<f32> for Mm {
    fn from(value: f32) -> Self {
        Mm::new(value)
    }
}

impl From<Mm> for f32 {
    fn from(value: Mm) -> Self {
        value.to_f32()
    }
}

impl fmt::Display for Mm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_css())
    }
}

impl std::ops::Add for Mm {
    type Output = Mm;
    fn add(self, rhs: Mm) -> Mm {
        Mm(self.0.saturating_add(rhs.0))
    }
}

impl std::ops::Sub for Mm {
    type Output = Mm;
    fn sub(self, rhs: Mm) -> Mm {
        Mm(self.0.saturating_sub(rhs.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: Mm,
    pub height: Mm,
}

impl PageSize {
    pub fn new(width: impl Into<Mm>, height: impl Into<Mm>) -> Self {
        Self {
            width: width.into(),
            height: height.into(),
        }
    }

    pub fn a4() -> Self {
        Self::new(210.0, 297.0)
    }

    pub fn letter() -> Self {
        Self {
            width: Mm::from_inches(8.5),
            height: Mm::from_inches(11.0),
        }
    }

    /// Thermal label stock used for harvest and shipping labels.
    pub fn label_80x40() -> Self {
        Self::new(80.0, 40.0)
    }

    pub fn is_empty(&self) -> bool {
        self.width.to_milli() <= 0 || self.height.to_milli() <= 0
    }

    /// `size` value for an `@page` rule. Standard sheets use their keyword.
    pub fn to_css(&self) -> String {
        if *self == PageSize::a4() {
            return "A4".to_string();
        }
        if *self == PageSize::letter() {
            return "letter".to_string();
        }
        format!("{} {}", self.width.to_css(), self.height.to_css())
    }

    pub fn from_keyword(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "a4" => Some(PageSize::a4()),
            "a5" => Some(PageSize::new(148.0, 210.0)),
            "a3" => Some(PageSize::new(297.0, 420.0)),
            "letter" => Some(PageSize::letter()),
            _ => None,
        }
    }

    pub fn landscape(self) -> Self {
        if self.width >= self.height {
            self
        } else {
            Self {
                width: self.height,
                height: self.width,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Margins {
    pub top: Mm,
    pub right: Mm,
    pub bottom: Mm,
    pub left: Mm,
}

impl Margins {
    pub fn all(value: impl Into<Mm>) -> Self {
        let v = value.into();
        Self {
            top: v,
            right: v,
            bottom: v,
            left: v,
        }
    }

    pub fn symmetric(vertical: impl Into<Mm>, horizontal: impl Into<Mm>) -> Self {
        let v = vertical.into();
        let h = horizontal.into();
        Self {
            top: v,
            right: h,
            bottom: v,
            left: h,
        }
    }

    pub fn zero() -> Self {
        Self::all(Mm::ZERO)
    }

    /// Shortest `margin` shorthand that reproduces these four sides.
    pub fn to_css(&self) -> String {
        let (t, r, b, l) = (self.top, self.right, self.bottom, self.left);
        if t == r && r == b && b == l {
            t.to_css()
        } else if t == b && r == l {
            format!("{} {}", t.to_css(), r.to_css())
        } else if r == l {
            format!("{} {} {}", t.to_css(), r.to_css(), b.to_css())
        } else {
            format!("{} {} {} {}", t.to_css(), r.to_css(), b.to_css(), l.to_css())
        }
    }
}
