//! Placeholder expansion for configuration values.
//!
//! Supports `${env:VAR}` environment-variable placeholders and a leading
//! `~` for the user's home directory.

/// Replace all `${env:VAR}` placeholders in `input` with the value of the
/// corresponding environment variable. Unknown variables are left as-is.
pub fn expand_env_placeholders(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${env:") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 6..];
        match after.find('}') {
            Some(end) => {
                let var = &after[..end];
                match std::env::var(var) {
                    Ok(value) => result.push_str(&value),
                    Err(_) => {
                        // Keep the placeholder so the user sees what failed.
                        result.push_str(&rest[start..start + 6 + end + 1]);
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated placeholder, keep verbatim.
                result.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    result.push_str(rest);
    result
}

/// Expand a leading `~` or `~/` to the user's home directory.
///
/// Paths without a leading tilde are returned unchanged, as are paths of
/// the `~user/` form which we do not resolve.
pub fn expand_tilde(path: &str) -> String {
    if path == "~" {
        return home_dir().unwrap_or_else(|| path.to_string());
    }
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        if let Some(home) = home_dir() {
            return format!("{}{}{}", home, std::path::MAIN_SEPARATOR, rest);
        }
    }
    path.to_string()
}

fn home_dir() -> Option<String> {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .ok()
        .filter(|s| !s.is_empty())
}
