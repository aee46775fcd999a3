/// Zero-byte marker object placed under `<login_id>/` on every run so an
/// empty listing can be told apart from an account that was never synced.
pub const FILE_PLACEHOLDER: &str = ".file_placeholder";

/// Characters that cannot appear in a destination object key segment.
const INVALID: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

const MAX_SUBJECT_LEN: usize = 50;

/// Replace filesystem-hostile characters with `_`.
pub fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| if INVALID.contains(&c) { '_' } else { c })
        .collect()
}

/// Destination key for a mail message: sanitized subject (truncated to 50
/// characters, `no_subject` when empty) suffixed with the message id so two
/// messages with the same subject never collide.
pub fn mail_object_key(login_id: &str, subject: &str, message_id: &str) -> String {
    let subject = subject.trim();
    let subject = if subject.is_empty() {
        "no_subject".to_string()
    } else {
        sanitize(&subject.chars().take(MAX_SUBJECT_LEN).collect::<String>())
    };
    format!("{login_id}/{subject}_{message_id}.json")
}

/// Destination key for a drive or photos item: `<itemID>_<filename>` under
/// the user's prefix.
pub fn item_object_key(login_id: &str, item_id: &str, file_name: &str) -> String {
    format!("{login_id}/{item_id}_{}", sanitize(file_name))
}

/// Destination key for a photo inside an album:
/// `<albumID>_<albumTitle>/<photoID>_<filename>`.
pub fn album_object_key(
    login_id: &str,
    album_id: &str,
    album_title: &str,
    photo_id: &str,
    file_name: &str,
) -> String {
    format!(
        "{login_id}/{album_id}_{}/{photo_id}_{}",
        sanitize(album_title),
        sanitize(file_name)
    )
}

/// Destination key for a database dump:
/// `<engine>/<dbname>_<unix_ts>.sql.tar.gz`.
pub fn dump_object_key(engine: &str, database: &str, unix_ts: i64) -> String {
    format!("{engine}/{}_{unix_ts}.sql.tar.gz", sanitize(database))
}

/// The placeholder key for a user prefix.
pub fn placeholder_key(login_id: &str) -> String {
    format!("{login_id}/{FILE_PLACEHOLDER}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_reserved_chars() {
        assert_eq!(sanitize(r#"a/b\c:d*e?f"g<h>i|j"#), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize("plain name.txt"), "plain name.txt");
    }

    #[test]
    fn mail_key_truncates_and_defaults_subject() {
        let long = "x".repeat(80);
        let key = mail_object_key("a@x", &long, "m1");
        assert_eq!(key, format!("a@x/{}_m1.json", "x".repeat(50)));

        assert_eq!(mail_object_key("a@x", "", "m2"), "a@x/no_subject_m2.json");
        assert_eq!(mail_object_key("a@x", "  ", "m3"), "a@x/no_subject_m3.json");
    }

    #[test]
    fn same_name_different_ids_do_not_collide() {
        let a = item_object_key("a@x", "id1", "photo.jpg");
        let b = item_object_key("a@x", "id2", "photo.jpg");
        assert_ne!(a, b);
    }

    #[test]
    fn album_key_nests_under_album_dir() {
        let key = album_object_key("a@x", "alb1", "Trip: 2024", "p9", "img.png");
        assert_eq!(key, "a@x/alb1_Trip_ 2024/p9_img.png");
    }

    #[test]
    fn subject_with_separators_stays_single_segment() {
        let key = mail_object_key("a@x", "re: invoice/march", "m4");
        assert_eq!(key, "a@x/re_ invoice_march_m4.json");
    }
}
