use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Next-period price direction. Codes are fixed: DOWN = 0, UP = 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "DOWN")]
    Down,
    #[serde(rename = "UP")]
    Up,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Down, Direction::Up];

    /// UP only when the next close is strictly above the current close.
    pub fn from_closes(current_close: f64, next_close: f64) -> Self {
        if next_close > current_close {
            Direction::Up
        } else {
            Direction::Down
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Direction::Down => 0,
            Direction::Up => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Direction::Down => "DOWN",
            Direction::Up => "UP",
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Direction::Down),
            1 => Some(Direction::Up),
            _ => None,
        }
    }

    /// `(label_name, label_code)`, e.g. `("DOWN", 0)`.
    pub fn as_pair(self) -> (&'static str, u32) {
        (self.name(), self.code())
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Label vocabulary: name -> code.
pub fn classes() -> BTreeMap<String, u32> {
    Direction::ALL
        .iter()
        .map(|d| (d.name().to_string(), d.code()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_rule() {
        assert_eq!(Direction::from_closes(10.0, 10.5), Direction::Up);
        assert_eq!(Direction::from_closes(10.0, 9.5), Direction::Down);
        // Unchanged close counts as DOWN
        assert_eq!(Direction::from_closes(10.0, 10.0), Direction::Down);
    }

    #[test]
    fn test_codes_roundtrip() {
        for d in Direction::ALL {
            assert_eq!(Direction::from_code(d.code()), Some(d));
        }
        assert_eq!(Direction::from_code(2), None);
        assert_eq!(Direction::Up.as_pair(), ("UP", 1));
        assert_eq!(Direction::Down.as_pair(), ("DOWN", 0));
    }

    #[test]
    fn test_classes_map() {
        let classes = classes();
        assert_eq!(classes.len(), 2);
        assert_eq!(classes["DOWN"], 0);
        assert_eq!(classes["UP"], 1);
    }
}
