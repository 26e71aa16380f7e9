//! Browser steps the UI Driver compiles into a Playwright script

use crate::scenario::{FormTarget, Scenario};

/// A single browser step
#[derive(Debug, Clone, PartialEq)]
pub enum UiStep {
    /// Navigate to a URL (relative to the frontend base)
    Navigate { url: String },

    /// Wait for an element to become visible
    WaitFor { selector: String, timeout_ms: Option<u64> },

    /// Set an input's value verbatim
    Fill { selector: String, value: String },

    Click { selector: String },

    /// Bounded wait for network idle. Running out of time leaves a note on
    /// the observation instead of failing the run.
    WaitForNetworkIdle { timeout_ms: Option<u64> },

    /// Bounded wait for the next `alert()` dialog. The message is recorded,
    /// and judged by the caller, not by the script.
    AwaitDialog { timeout_ms: Option<u64> },

    /// Page title must match a case-insensitive regex
    AssertTitle { pattern: String },

    AssertVisible { selector: String },

    /// Take a screenshot into the screenshot directory
    Screenshot {
        name: String,
        selector: Option<String>,
        full_page: bool,
    },
}

impl UiStep {
    /// Short label used in script comments and logs
    pub fn label(&self) -> String {
        match self {
            UiStep::Navigate { url } => format!("navigate:{}", url),
            UiStep::WaitFor { selector, .. } => format!("wait:{}", selector),
            UiStep::Fill { selector, .. } => format!("fill:{}", selector),
            UiStep::Click { selector } => format!("click:{}", selector),
            UiStep::WaitForNetworkIdle { .. } => "network-idle".to_string(),
            UiStep::AwaitDialog { .. } => "dialog".to_string(),
            UiStep::AssertTitle { .. } => "assert-title".to_string(),
            UiStep::AssertVisible { selector } => format!("assert-visible:{}", selector),
            UiStep::Screenshot { name, .. } => format!("screenshot:{}", name),
        }
    }

    /// Navigate to the form, fill every field of `scenario`, submit, and
    /// collect the result dialog.
    pub fn submit_form(form: FormTarget, scenario: &Scenario) -> Vec<UiStep> {
        let mut steps = vec![
            UiStep::Navigate { url: form.page().to_string() },
            UiStep::WaitFor {
                selector: form.form_selector().to_string(),
                timeout_ms: None,
            },
        ];
        steps.extend(scenario.fields.iter().map(|(field, value)| UiStep::Fill {
            selector: form.field_selector(field),
            value: value.clone(),
        }));
        steps.push(UiStep::Click {
            selector: form.submit_selector().to_string(),
        });
        steps.push(UiStep::WaitForNetworkIdle { timeout_ms: None });
        steps.push(UiStep::AwaitDialog { timeout_ms: None });
        steps
    }

    /// Load a page until it is stable enough to capture.
    pub fn stable_page(form: FormTarget, title_pattern: &str) -> Vec<UiStep> {
        vec![
            UiStep::Navigate { url: form.page().to_string() },
            UiStep::WaitForNetworkIdle { timeout_ms: None },
            UiStep::AssertTitle {
                pattern: title_pattern.to_string(),
            },
            UiStep::AssertVisible {
                selector: form.form_selector().to_string(),
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::OutcomeClass;

    #[test]
    fn test_submit_form_fills_in_field_order() {
        let scenario = Scenario::new(
            "valid",
            &[("name", "Eddie"), ("email", "eddie@mail.com"), ("message", "Hi")],
            OutcomeClass::Success,
        );
        let steps = UiStep::submit_form(FormTarget::Contact, &scenario);

        let fills: Vec<_> = steps
            .iter()
            .filter_map(|s| match s {
                UiStep::Fill { selector, .. } => Some(selector.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(fills, vec!["#name", "#email", "#message"]);
        assert_eq!(steps.first(), Some(&UiStep::Navigate { url: "/contact.html".into() }));
        assert!(matches!(steps.last(), Some(UiStep::AwaitDialog { .. })));
    }

    #[test]
    fn test_stable_page_checks_title_then_form() {
        let steps = UiStep::stable_page(FormTarget::Login, "Login");
        let labels: Vec<_> = steps.iter().map(UiStep::label).collect();
        assert_eq!(
            labels,
            vec!["navigate:/login.html", "network-idle", "assert-title", "assert-visible:#loginForm"]
        );
    }
}
