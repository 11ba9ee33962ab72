//! Per-position digit substitution of message type codes.

use crate::MuxError;

/// The default tables: the version and class digits map to themselves, while the
/// function digit collapses request/response (0/1), advice/advice-response (2/3)
/// and notification/acknowledgement (4/5) onto the same symbol.
pub const DEFAULT_MTI_MAPPING: [&str; 3] = ["0123456789", "0123456789", "0022446789"];

/// Three digit substitution tables, one for each of the first three digits of a
/// 4-digit type code. The fourth digit (the origin) is ignored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MtiMapping {
    tables: [[char; 10]; 3],
}

impl Default for MtiMapping {
    fn default() -> Self {
        // The default tables are known to be valid.
        Self::from_strs(&DEFAULT_MTI_MAPPING).unwrap_or_else(|_| unreachable!())
    }
}

impl MtiMapping {
    /// Build a mapping from three strings of exactly ten characters each.
    ///
    /// Character `n` of table `i` is what digit `n` at position `i` maps to.
    pub fn from_strs<S: AsRef<str>>(tables: &[S]) -> Result<Self, MuxError> {
        if tables.len() != 3 {
            return Err(MuxError::InvalidConfig(format!(
                "MTI mapping needs 3 tables, {} given.",
                tables.len()
            )));
        }

        let mut parsed = [['0'; 10]; 3];
        for (position, table) in tables.iter().enumerate() {
            let chars: Vec<char> = table.as_ref().chars().collect();
            parsed[position] = chars.try_into().map_err(|chars: Vec<char>| {
                MuxError::InvalidConfig(format!(
                    "MTI mapping table {position} must have 10 characters, {} given.",
                    chars.len()
                ))
            })?;
        }

        Ok(Self { tables: parsed })
    }

    /// Map a message type code through the tables.
    ///
    /// Codes shorter than 4 digits are left-padded with zeros; characters that are
    /// not digits are skipped. Codes longer than 4 digits map to an empty string.
    pub fn map(&self, type_code: &str) -> String {
        let padded = format!("{type_code:0>4}");

        if padded.chars().count() != 4 {
            return String::new();
        }

        padded
            .chars()
            .zip(self.tables.iter())
            .filter_map(|(c, table)| c.to_digit(10).map(|digit| table[digit as usize]))
            .collect()
    }
}
