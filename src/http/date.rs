//! IMF-fixdate formatting for the `Date:` response header (RFC 9110 §5.6.7,
//! spec §4.6).

use chrono::{DateTime, Utc};

/// Formats `when` as IMF-fixdate, e.g. `Tue, 15 Nov 1994 08:12:31 GMT`.
pub fn imf_fixdate(when: DateTime<Utc>) -> String {
    when.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_imf_fixdate() {
        let when = Utc.with_ymd_and_hms(1994, 11, 15, 8, 12, 31).unwrap();
        assert_eq!(imf_fixdate(when), "Tue, 15 Nov 1994 08:12:31 GMT");
    }
}
