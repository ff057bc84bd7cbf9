use super::Statement;
use crate::errors::Error;
use crate::storage::Row;
use once_cell::sync::Lazy;
use regex::Regex;

/// `insert <id> <username> <email>`; trailing tokens are ignored, matching
/// the tokenizer this grammar descends from.
static INSERT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^insert\s+([+-]?\d+)\s+(\S+)\s+(\S+)").expect("insert pattern"));

/// Parses one input line into a [`Statement`].
///
/// # Errors
/// - `Error::Syntax` — the line starts like an insert but does not parse.
/// - `Error::NegativeId` — the id token is negative.
/// - `Error::StringTooLong` — a column exceeds its maximum width.
/// - `Error::Unrecognized` — the line starts with no known keyword.
pub fn prepare_statement(input: &str) -> Result<Statement, Error> {
    if input == "select" {
        return Ok(Statement::Select);
    }
    if input.starts_with("insert") {
        return prepare_insert(input);
    }
    Err(Error::Unrecognized(input.to_string()))
}

fn prepare_insert(input: &str) -> Result<Statement, Error> {
    let caps = INSERT_RE
        .captures(input)
        .ok_or_else(|| err!(Syntax, "Could not parse statement."))?;

    let id: i64 = caps[1]
        .parse()
        .map_err(|_| err!(Syntax, "Could not parse statement."))?;
    if id < 0 {
        return Err(Error::NegativeId);
    }
    let id = u32::try_from(id).map_err(|_| err!(Syntax, "Could not parse statement."))?;

    let row = Row::new(id, &caps[2], &caps[3])?;
    Ok(Statement::Insert(row))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::row::{COLUMN_EMAIL_SIZE, COLUMN_USERNAME_SIZE};

    #[test]
    fn parses_insert() {
        let statement = prepare_statement("insert 1 user1 person1@example.com").unwrap();
        match statement {
            Statement::Insert(row) => {
                assert_eq!(row.id, 1);
                assert_eq!(row.username(), "user1");
                assert_eq!(row.email(), "person1@example.com");
            }
            _ => panic!("expected insert"),
        }
    }

    #[test]
    fn explicitly_signed_positive_id_is_accepted() {
        let statement = prepare_statement("insert +5 alice a@a.com").unwrap();
        match statement {
            Statement::Insert(row) => assert_eq!(row.id, 5),
            _ => panic!("expected insert"),
        }
    }

    #[test]
    fn parses_select() {
        assert!(matches!(
            prepare_statement("select"),
            Ok(Statement::Select)
        ));
    }

    #[test]
    fn negative_id_is_its_own_error() {
        assert!(matches!(
            prepare_statement("insert -1 a a@a.com"),
            Err(Error::NegativeId)
        ));
    }

    #[test]
    fn maximum_length_strings_are_accepted() {
        let username = "a".repeat(COLUMN_USERNAME_SIZE);
        let email = "b".repeat(COLUMN_EMAIL_SIZE);
        let line = format!("insert 1 {} {}", username, email);
        assert!(prepare_statement(&line).is_ok());
    }

    #[test]
    fn oversize_strings_are_rejected() {
        let username = "a".repeat(COLUMN_USERNAME_SIZE + 1);
        let line = format!("insert 1 {} a@a.com", username);
        assert!(matches!(
            prepare_statement(&line),
            Err(Error::StringTooLong)
        ));

        let email = "b".repeat(COLUMN_EMAIL_SIZE + 1);
        let line = format!("insert 1 a {}", email);
        assert!(matches!(
            prepare_statement(&line),
            Err(Error::StringTooLong)
        ));
    }

    #[test]
    fn incomplete_insert_is_a_syntax_error() {
        assert!(matches!(
            prepare_statement("insert 1 a"),
            Err(Error::Syntax(_))
        ));
        assert!(matches!(
            prepare_statement("insert"),
            Err(Error::Syntax(_))
        ));
        assert!(matches!(
            prepare_statement("insert abc a b"),
            Err(Error::Syntax(_))
        ));
    }

    #[test]
    fn unknown_keyword_is_reported_with_the_input() {
        match prepare_statement("frobnicate 1") {
            Err(Error::Unrecognized(line)) => assert_eq!(line, "frobnicate 1"),
            other => panic!("unexpected: {:?}", other.err()),
        }
        // `select` takes no arguments in this grammar.
        assert!(matches!(
            prepare_statement("select *"),
            Err(Error::Unrecognized(_))
        ));
    }
}
