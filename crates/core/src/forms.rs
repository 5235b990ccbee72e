//! Case report forms and requisitions attached to a visit.

use crate::error::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use vs_types::{ModelLabel, NonEmptyText};

/// A single data-collection instrument due at a visit.
///
/// A form without a panel is a CRF; a form with a panel is a requisition for
/// that lab panel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Form {
    model: ModelLabel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    panel: Option<NonEmptyText>,
    #[serde(default = "default_required")]
    required: bool,
    show_order: u32,
}

fn default_required() -> bool {
    true
}

impl Form {
    pub fn crf(show_order: u32, model: ModelLabel, required: bool) -> Self {
        Self {
            model,
            panel: None,
            required,
            show_order,
        }
    }

    pub fn requisition(
        show_order: u32,
        model: ModelLabel,
        panel: NonEmptyText,
        required: bool,
    ) -> Self {
        Self {
            model,
            panel: Some(panel),
            required,
            show_order,
        }
    }

    pub fn model(&self) -> &ModelLabel {
        &self.model
    }

    pub fn panel(&self) -> Option<&NonEmptyText> {
        self.panel.as_ref()
    }

    pub fn required(&self) -> bool {
        self.required
    }

    pub fn show_order(&self) -> u32 {
        self.show_order
    }

    /// True if this form is `model`, and, when `panel` is given, is for that panel.
    pub fn matches(&self, model: &ModelLabel, panel: Option<&str>) -> bool {
        if &self.model != model {
            return false;
        }
        match panel {
            Some(panel) => self.panel.as_ref().is_some_and(|p| p.as_str() == panel),
            None => true,
        }
    }
}

impl fmt::Display for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.panel {
            Some(panel) => write!(f, "{}.{}", self.model, panel),
            None => write!(f, "{}", self.model),
        }
    }
}

/// An ordered, duplicate-free collection of forms.
///
/// Declaration order is kept. No two entries may share a model+panel pair or a
/// `show_order`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FormsCollection {
    forms: Vec<Form>,
}

impl FormsCollection {
    pub fn new(forms: impl IntoIterator<Item = Form>) -> DomainResult<Self> {
        let mut collection = Self::default();
        for form in forms {
            collection.add(form)?;
        }
        Ok(collection)
    }

    fn add(&mut self, form: Form) -> DomainResult<()> {
        for existing in &self.forms {
            if existing.model == form.model && existing.panel == form.panel {
                return Err(DomainError::AlreadyRegisteredForm {
                    form: form.to_string(),
                    attr: "model",
                });
            }
            if existing.show_order == form.show_order {
                return Err(DomainError::AlreadyRegisteredForm {
                    form: form.to_string(),
                    attr: "show_order",
                });
            }
        }
        self.forms.push(form);
        Ok(())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Form> {
        self.forms.iter()
    }

    pub fn as_slice(&self) -> &[Form] {
        &self.forms
    }

    pub fn len(&self) -> usize {
        self.forms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forms.is_empty()
    }

    /// First form for `model`, ignoring panel.
    pub fn get(&self, model: &ModelLabel) -> Option<&Form> {
        self.forms.iter().find(|form| form.matches(model, None))
    }

    /// First form for `model` and `panel`.
    pub fn get_with_panel(&self, model: &ModelLabel, panel: &str) -> Option<&Form> {
        self.forms.iter().find(|form| form.matches(model, Some(panel)))
    }
}

impl<'a> IntoIterator for &'a FormsCollection {
    type Item = &'a Form;
    type IntoIter = std::slice::Iter<'a, Form>;

    fn into_iter(self) -> Self::IntoIter {
        self.forms.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(s: &str) -> ModelLabel {
        ModelLabel::new(s).unwrap()
    }

    fn panel(s: &str) -> NonEmptyText {
        NonEmptyText::new(s).unwrap()
    }

    #[test]
    fn collection_preserves_declaration_order() {
        let forms = FormsCollection::new([
            Form::crf(3, label("app.crfthree"), true),
            Form::crf(1, label("app.crfone"), true),
            Form::crf(2, label("app.crftwo"), false),
        ])
        .unwrap();

        let models: Vec<&str> = forms.iter().map(|f| f.model().as_str()).collect();
        assert_eq!(models, ["app.crfthree", "app.crfone", "app.crftwo"]);
    }

    #[test]
    fn collection_rejects_duplicate_model_and_panel() {
        let err = FormsCollection::new([
            Form::requisition(1, label("app.requisition"), panel("fbc"), true),
            Form::requisition(2, label("app.requisition"), panel("fbc"), true),
        ])
        .expect_err("duplicate model+panel");
        assert!(matches!(err, DomainError::AlreadyRegisteredForm { attr: "model", .. }));
    }

    #[test]
    fn collection_allows_same_model_with_different_panels() {
        let forms = FormsCollection::new([
            Form::requisition(1, label("app.requisition"), panel("fbc"), true),
            Form::requisition(2, label("app.requisition"), panel("chemistry"), true),
        ])
        .unwrap();
        assert_eq!(
            forms
                .get_with_panel(&label("app.requisition"), "chemistry")
                .map(Form::show_order),
            Some(2)
        );
    }

    #[test]
    fn collection_rejects_duplicate_show_order() {
        let err = FormsCollection::new([
            Form::crf(1, label("app.crfone"), true),
            Form::crf(1, label("app.crftwo"), true),
        ])
        .expect_err("duplicate show order");
        assert!(matches!(err, DomainError::AlreadyRegisteredForm { attr: "show_order", .. }));
    }

    #[test]
    fn form_display_includes_panel() {
        let form = Form::requisition(1, label("app.requisition"), panel("fbc"), true);
        assert_eq!(form.to_string(), "app.requisition.fbc");
    }
}
