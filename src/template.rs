/// Placeholder replaced with the recipient's display name.
pub const NAME_TOKEN: &str = "{name}";

/// Replace every `{name}` in `template` with `display_name`.
pub fn render(template: &str, display_name: &str) -> String {
    template.replace(NAME_TOKEN, display_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_every_occurrence() {
        assert_eq!(render("Hi {name}, bye {name}", "Ana"), "Hi Ana, bye Ana");
    }

    #[test]
    fn leaves_other_braces_alone() {
        assert_eq!(render("{first} {name}!", "Bo"), "{first} Bo!");
        assert_eq!(render("no token", "Bo"), "no token");
    }
}
