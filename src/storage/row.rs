//! # Row Management
//!
//! A row is a fixed-size record: a `u32` primary key and two zero-padded
//! text columns. Rows live only as serialized bytes inside leaf cells; this
//! module owns the one layout shared by memory and disk.

use crate::errors::Error;
use std::fmt;

/// Maximum number of content bytes in the `username` column.
pub const COLUMN_USERNAME_SIZE: usize = 32;

/// Maximum number of content bytes in the `email` column.
pub const COLUMN_EMAIL_SIZE: usize = 255;

/// Stored width of the `username` field. One trailing NUL byte is reserved.
pub const USERNAME_FIELD_SIZE: usize = COLUMN_USERNAME_SIZE + 1;

/// Stored width of the `email` field. One trailing NUL byte is reserved.
pub const EMAIL_FIELD_SIZE: usize = COLUMN_EMAIL_SIZE + 1;

pub const ID_SIZE: usize = std::mem::size_of::<u32>();
pub const ID_OFFSET: usize = 0;
pub const USERNAME_OFFSET: usize = ID_OFFSET + ID_SIZE;
pub const EMAIL_OFFSET: usize = USERNAME_OFFSET + USERNAME_FIELD_SIZE;

/// Serialized size of a row: 4 + 33 + 256 = 293 bytes.
pub const ROW_SIZE: usize = ID_SIZE + USERNAME_FIELD_SIZE + EMAIL_FIELD_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub id: u32,
    username: [u8; USERNAME_FIELD_SIZE],
    email: [u8; EMAIL_FIELD_SIZE],
}

impl Row {
    /// Builds a row, validating column lengths.
    ///
    /// # Errors
    /// Returns `Error::StringTooLong` if either column exceeds its maximum
    /// content size.
    pub fn new(id: u32, username: &str, email: &str) -> Result<Self, Error> {
        if username.len() > COLUMN_USERNAME_SIZE || email.len() > COLUMN_EMAIL_SIZE {
            return Err(Error::StringTooLong);
        }
        Ok(Row {
            id,
            username: str_to_fixed_bytes(username),
            email: str_to_fixed_bytes(email),
        })
    }

    pub fn username(&self) -> &str {
        fixed_bytes_to_str(&self.username)
    }

    pub fn email(&self) -> &str {
        fixed_bytes_to_str(&self.email)
    }

    /// Writes the row into `dest`, which must be exactly `ROW_SIZE` bytes.
    pub fn serialize(&self, dest: &mut [u8]) {
        debug_assert_eq!(dest.len(), ROW_SIZE);
        dest[ID_OFFSET..ID_OFFSET + ID_SIZE].copy_from_slice(&self.id.to_le_bytes());
        dest[USERNAME_OFFSET..USERNAME_OFFSET + USERNAME_FIELD_SIZE]
            .copy_from_slice(&self.username);
        dest[EMAIL_OFFSET..EMAIL_OFFSET + EMAIL_FIELD_SIZE].copy_from_slice(&self.email);
    }

    /// Reads a row back from a `ROW_SIZE`-byte leaf value.
    pub fn deserialize(src: &[u8]) -> Result<Self, Error> {
        if src.len() != ROW_SIZE {
            return Err(err!(
                Storage,
                "Row size mismatch (expected={}, got={})",
                ROW_SIZE,
                src.len()
            ));
        }
        let id = u32::from_le_bytes(
            src[ID_OFFSET..ID_OFFSET + ID_SIZE]
                .try_into()
                .map_err(|e| err!(Storage, "Failed to decode row id: {:?}", e))?,
        );
        let mut username = [0u8; USERNAME_FIELD_SIZE];
        username.copy_from_slice(&src[USERNAME_OFFSET..USERNAME_OFFSET + USERNAME_FIELD_SIZE]);
        let mut email = [0u8; EMAIL_FIELD_SIZE];
        email.copy_from_slice(&src[EMAIL_OFFSET..EMAIL_OFFSET + EMAIL_FIELD_SIZE]);
        Ok(Row {
            id,
            username,
            email,
        })
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.id, self.username(), self.email())
    }
}

fn str_to_fixed_bytes<const N: usize>(input: &str) -> [u8; N] {
    let mut buffer = [0u8; N];
    let bytes = input.as_bytes();
    buffer[..bytes.len()].copy_from_slice(bytes);
    buffer
}

fn fixed_bytes_to_str(buffer: &[u8]) -> &str {
    let end = buffer.iter().position(|&b| b == 0).unwrap_or(buffer.len());
    // Construction only ever stores UTF-8; fall back to empty on a foreign file.
    std::str::from_utf8(&buffer[..end]).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_size_is_fixed() {
        assert_eq!(ROW_SIZE, 293);
        let row = Row::new(1, "user1", "person1@example.com").unwrap();
        let mut buf = [0u8; ROW_SIZE];
        row.serialize(&mut buf);
        let back = Row::deserialize(&buf).unwrap();
        assert_eq!(back, row);
    }

    #[test]
    fn columns_at_maximum_length_are_accepted() {
        let username = "a".repeat(COLUMN_USERNAME_SIZE);
        let email = "b".repeat(COLUMN_EMAIL_SIZE);
        let row = Row::new(7, &username, &email).unwrap();
        assert_eq!(row.username(), username);
        assert_eq!(row.email(), email);
    }

    #[test]
    fn oversize_columns_are_rejected() {
        let username = "a".repeat(COLUMN_USERNAME_SIZE + 1);
        assert!(matches!(
            Row::new(1, &username, "a@a.com"),
            Err(Error::StringTooLong)
        ));
        let email = "b".repeat(COLUMN_EMAIL_SIZE + 1);
        assert!(matches!(
            Row::new(1, "a", &email),
            Err(Error::StringTooLong)
        ));
    }

    #[test]
    fn display_matches_select_output() {
        let row = Row::new(1, "user1", "person1@example.com").unwrap();
        assert_eq!(row.to_string(), "(1, user1, person1@example.com)");
    }
}
