//! Migration file and function naming.
//!
//! Names are `<timestamp><separator><description>` so that lexicographic
//! order follows creation order.

use chrono::{DateTime, Local};
use strata_common::NameConvention;

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Turns a free-form description into file and function names.
///
/// Neither name ever contains whitespace.
pub trait Caser {
    fn to_file_case(&self, at: DateTime<Local>, description: &str) -> String;
    fn to_func_case(&self, at: DateTime<Local>, description: &str) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SnakeCaser;

impl Caser for SnakeCaser {
    fn to_file_case(&self, at: DateTime<Local>, description: &str) -> String {
        camel_to_snake(&stamped(at, description))
    }

    fn to_func_case(&self, at: DateTime<Local>, description: &str) -> String {
        camel_to_snake(&stamped(at, description))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CamelCaser;

impl Caser for CamelCaser {
    fn to_file_case(&self, at: DateTime<Local>, description: &str) -> String {
        snake_to_camel(&stamped(at, description))
    }

    fn to_func_case(&self, at: DateTime<Local>, description: &str) -> String {
        snake_to_camel(&stamped(at, description))
    }
}

pub fn caser_for(convention: NameConvention) -> Box<dyn Caser> {
    match convention {
        NameConvention::SnakeCase => Box::new(SnakeCaser),
        NameConvention::CamelCase => Box::new(CamelCaser),
    }
}

fn stamped(at: DateTime<Local>, description: &str) -> String {
    format!("{} {}", at.format(TIMESTAMP_FORMAT), description)
}

fn is_boundary(c: char) -> bool {
    c == '_' || !c.is_alphanumeric()
}

/// `AddUsers table` -> `add_users_table`.
///
/// Uppercase letters and runs of boundary characters each start a new word.
pub fn camel_to_snake(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 8);
    let mut pending_boundary = false;

    for c in input.chars() {
        if is_boundary(c) {
            pending_boundary = true;
            continue;
        }
        if !out.is_empty() && (pending_boundary || c.is_uppercase()) {
            out.push('_');
        }
        pending_boundary = false;
        push_ascii(&mut out, c.to_lowercase());
    }
    out
}

/// `add users_table` -> `AddUsersTable`; a leading word keeps its case
/// lowered, so `add users` -> `addUsers`.
pub fn snake_to_camel(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_boundary = false;

    for c in input.chars() {
        if is_boundary(c) {
            pending_boundary = true;
            continue;
        }
        if pending_boundary && !out.is_empty() {
            push_ascii(&mut out, c.to_uppercase());
        } else {
            push_ascii(&mut out, c.to_lowercase());
        }
        pending_boundary = false;
    }
    out
}

// Identifiers must stay ASCII to be valid in file names and Rust source.
fn push_ascii(out: &mut String, chars: impl Iterator<Item = char>) {
    out.extend(chars.filter(|c| c.is_ascii_alphanumeric()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap()
    }

    #[test]
    fn snake_caser_names() {
        let caser = SnakeCaser;
        assert_eq!(caser.to_file_case(at(), "add users"), "20240131120000_add_users");
        assert_eq!(caser.to_func_case(at(), "AddUsers"), "20240131120000_add_users");
    }

    #[test]
    fn camel_caser_names() {
        let caser = CamelCaser;
        assert_eq!(caser.to_file_case(at(), "add users"), "20240131120000AddUsers");
        assert_eq!(caser.to_func_case(at(), "add_users"), "20240131120000AddUsers");
    }

    #[test]
    fn caser_for_convention() {
        let snake = caser_for(NameConvention::SnakeCase);
        let camel = caser_for(NameConvention::CamelCase);
        assert_eq!(snake.to_file_case(at(), "x y"), "20240131120000_x_y");
        assert_eq!(camel.to_file_case(at(), "x y"), "20240131120000XY");
    }

    #[test]
    fn conversions() {
        assert_eq!(camel_to_snake("AddUsersTable"), "add_users_table");
        assert_eq!(camel_to_snake("add  users--now"), "add_users_now");
        assert_eq!(snake_to_camel("add_users table"), "addUsersTable");
        assert_eq!(snake_to_camel("__add"), "add");
        assert_eq!(camel_to_snake(""), "");
    }

    #[test]
    fn output_is_identifier_safe() {
        let weird = "  drop\ttable \"users\"; héllo\n";
        for name in [
            SnakeCaser.to_file_case(at(), weird),
            CamelCaser.to_func_case(at(), weird),
        ] {
            assert!(
                name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'),
                "{name:?}"
            );
        }
    }
}
