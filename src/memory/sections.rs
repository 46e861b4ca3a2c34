//! Two-section memory text: `User Facts:` and `Follow-ups:` bullet lists

/// Sentinel a summary returns when nothing is worth remembering. Also used
/// as the placeholder bullet for an empty section.
pub const NO_MEMORY: &str = "NO_MEMORY";

const FACTS_HEADER: &str = "User Facts:";
const FOLLOW_UPS_HEADER: &str = "Follow-ups:";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemorySections {
    pub facts: Vec<String>,
    pub follow_ups: Vec<String>,
}

#[derive(Clone, Copy)]
enum Section {
    Facts,
    FollowUps,
}

impl MemorySections {
    /// Parse by header and `-` bullets. Bullets outside a section and
    /// sentinel bullets are dropped.
    pub fn parse(text: &str) -> Self {
        let mut sections = Self::default();
        let mut current = None;

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let lower = line.to_lowercase();
            if lower.starts_with("user facts") {
                current = Some(Section::Facts);
                continue;
            }
            if lower.starts_with("follow-ups") || lower.starts_with("follow ups") {
                current = Some(Section::FollowUps);
                continue;
            }

            let Some(bullet) = line.strip_prefix('-') else {
                continue;
            };
            let value = bullet.trim();
            if value.is_empty() || value.eq_ignore_ascii_case(NO_MEMORY) {
                continue;
            }

            match current {
                Some(Section::Facts) => sections.facts.push(value.to_string()),
                Some(Section::FollowUps) => sections.follow_ups.push(value.to_string()),
                None => {}
            }
        }

        sections
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty() && self.follow_ups.is_empty()
    }

    /// Ordered set union by exact text. Returns whether anything was added.
    pub fn merge(&mut self, other: &MemorySections) -> bool {
        let facts = merge_unique(&mut self.facts, &other.facts);
        let follow_ups = merge_unique(&mut self.follow_ups, &other.follow_ups);
        facts || follow_ups
    }

    pub fn render(&self) -> String {
        let mut lines = vec![FACTS_HEADER.to_string()];
        push_bullets(&mut lines, &self.facts);
        lines.push(String::new());
        lines.push(FOLLOW_UPS_HEADER.to_string());
        push_bullets(&mut lines, &self.follow_ups);
        lines.join("\n")
    }
}

fn merge_unique(existing: &mut Vec<String>, incoming: &[String]) -> bool {
    let mut changed = false;
    for item in incoming {
        if !item.is_empty() && !existing.contains(item) {
            existing.push(item.clone());
            changed = true;
        }
    }
    changed
}

fn push_bullets(lines: &mut Vec<String>, items: &[String]) {
    if items.is_empty() {
        lines.push(format!("- {}", NO_MEMORY));
    } else {
        lines.extend(items.iter().map(|item| format!("- {}", item)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_two_sections() {
        let text = "User Facts:\n- Name: Rohan\n-   Age: 35\n\nFollow-ups:\n- Share invoice list by Friday\n";
        let sections = MemorySections::parse(text);

        assert_eq!(sections.facts, vec!["Name: Rohan", "Age: 35"]);
        assert_eq!(sections.follow_ups, vec!["Share invoice list by Friday"]);
    }

    #[test]
    fn test_parse_drops_sentinels_and_stray_bullets() {
        let text = "- before any header\nuser facts\n- NO_MEMORY\nFOLLOW-UPS:\n- no_memory\n";
        let sections = MemorySections::parse(text);

        assert!(sections.is_empty());
        assert!(MemorySections::parse(NO_MEMORY).is_empty());
    }

    #[test]
    fn test_render_uses_placeholders() {
        let sections = MemorySections {
            facts: vec!["Prefers conservative investing".into()],
            follow_ups: Vec::new(),
        };

        assert_eq!(
            sections.render(),
            "User Facts:\n- Prefers conservative investing\n\nFollow-ups:\n- NO_MEMORY"
        );
        assert_eq!(MemorySections::parse(&sections.render()), sections);
    }

    #[test]
    fn test_merge_is_an_ordered_union() {
        let mut base = MemorySections::parse("User Facts:\n- Name: Rohan");
        let incoming = MemorySections::parse(
            "User Facts:\n- Name: Rohan\n- Prefers conservative investing\nFollow-ups:\n- Review SIP",
        );

        assert!(base.merge(&incoming));
        assert_eq!(base.facts, vec!["Name: Rohan", "Prefers conservative investing"]);
        assert_eq!(base.follow_ups, vec!["Review SIP"]);

        assert!(!base.merge(&incoming));
        assert_eq!(base.facts.len(), 2);
    }
}
