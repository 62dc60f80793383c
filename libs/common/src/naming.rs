/// Canonical topic name for a subscription field: upper snake case.
///
/// `onPostCreated` becomes `ON_POST_CREATED`. Digits stay attached to the
/// word they follow and existing separators collapse into a single `_`.
pub fn topic_name(field_name: &str) -> String {
    let mut out = String::with_capacity(field_name.len() + 4);
    let chars: Vec<char> = field_name.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if c == '_' || c == '-' || c.is_whitespace() {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            continue;
        }

        if c.is_uppercase() && i > 0 && !out.ends_with('_') {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            // Split "postID" -> POST_ID and "HTTPServer" -> HTTP_SERVER.
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_is_lower) {
                out.push('_');
            }
        }

        out.extend(c.to_uppercase());
    }

    while out.ends_with('_') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camel_case_fields() {
        assert_eq!(topic_name("onPostCreated"), "ON_POST_CREATED");
        assert_eq!(topic_name("postUpdated"), "POST_UPDATED");
        assert_eq!(topic_name("userID"), "USER_ID");
        assert_eq!(topic_name("HTTPServerStarted"), "HTTP_SERVER_STARTED");
    }

    #[test]
    fn already_snake_case() {
        assert_eq!(topic_name("on_post_created"), "ON_POST_CREATED");
        assert_eq!(topic_name("ON_POST_CREATED"), "ON_POST_CREATED");
    }

    #[test]
    fn separators_collapse() {
        assert_eq!(topic_name("post--created_"), "POST_CREATED");
        assert_eq!(topic_name("v2Released"), "V2_RELEASED");
    }
}
