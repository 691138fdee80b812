use bl_core::ButtonSpec;

/// Parses a raw `buttons:` block: one `label -> target` or bare `label` per line.
pub fn parse_buttons(text: &str) -> Vec<ButtonSpec> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let (label, target) = match line.split_once("->") {
                Some((label, target)) => (label, Some(target.trim())),
                None => (line, None),
            };
            ButtonSpec {
                label: label.trim().replace(['"', '\''], ""),
                target: target.filter(|target| !target.is_empty()).map(str::to_string),
            }
        })
        .collect()
}

#[cfg(test)]
mod buttons_tests {
    use super::*;

    #[test]
    fn parses_targets_and_bare_labels() {
        let buttons = parse_buttons("Yes -> /Confirm\n\n  \"No\"  \n'Maybe' -> ../Later\nEmpty ->\n");
        assert_eq!(
            buttons,
            vec![
                ButtonSpec {
                    label: "Yes".to_string(),
                    target: Some("/Confirm".to_string()),
                },
                ButtonSpec {
                    label: "No".to_string(),
                    target: None,
                },
                ButtonSpec {
                    label: "Maybe".to_string(),
                    target: Some("../Later".to_string()),
                },
                ButtonSpec {
                    label: "Empty".to_string(),
                    target: None,
                },
            ]
        );
    }

    #[test]
    fn empty_block_has_no_buttons() {
        assert!(parse_buttons("\n  \n").is_empty());
    }
}
