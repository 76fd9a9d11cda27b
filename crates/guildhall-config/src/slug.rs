// SPDX-License-Identifier: MIT

use chrono::{DateTime, Utc};

/// Derive a session id: a slug of `name` prefixed with today's date
/// (`YYYY-MM-DD-slug`), per spec §4.G `create`.
pub fn session_slug(name: &str, now: DateTime<Utc>) -> String {
    let slug = slugify(name);
    format!("{}-{}", now.format("%Y-%m-%d"), slug)
}

fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_dash = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_was_dash = false;
        } else if !last_was_dash && !out.is_empty() {
            out.push('-');
            last_was_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        out.push_str("session");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn slugifies_and_prefixes_date() {
        let id = session_slug("My Great Session!", date(2026, 7, 28));
        assert_eq!(id, "2026-07-28-my-great-session");
    }

    #[test]
    fn collapses_repeated_separators() {
        let id = session_slug("foo   bar--baz", date(2026, 1, 1));
        assert_eq!(id, "2026-01-01-foo-bar-baz");
    }

    #[test]
    fn empty_name_falls_back_to_session() {
        let id = session_slug("!!!", date(2026, 1, 1));
        assert_eq!(id, "2026-01-01-session");
    }
}
