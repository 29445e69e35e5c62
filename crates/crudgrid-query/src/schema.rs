use serde::{Deserialize, Serialize};

/// Semantic type of a record field. Decides which filter grammar applies and
/// how submitted form values are converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Integer,
    Date,
    String,
    Identifier,
}

/// The view a record is being presented in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subtype {
    List,
    Add,
    Edit,
    View,
    Delete,
    Stats,
}

impl Subtype {
    pub fn as_str(self) -> &'static str {
        match self {
            Subtype::List => "list",
            Subtype::Add => "add",
            Subtype::Edit => "edit",
            Subtype::View => "view",
            Subtype::Delete => "delete",
            Subtype::Stats => "stats",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub value: String,
    pub label: String,
}

impl Choice {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

/// One declared field: its type plus the display metadata the presentation
/// builder needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    pub label: String,
    /// chrono format string for dates.
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub choices: Option<Vec<Choice>>,
    /// Base URL of the referenced model; values render as links to its view page.
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub hide: Vec<Subtype>,
    #[serde(default)]
    pub required: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            field_type,
            format: None,
            choices: None,
            reference: None,
            hide: Vec::new(),
            required: false,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn choices(mut self, choices: Vec<Choice>) -> Self {
        self.choices = Some(choices);
        self
    }

    pub fn reference(mut self, base_url: impl Into<String>) -> Self {
        self.reference = Some(base_url.into());
        self
    }

    pub fn hidden_on(mut self, subtypes: &[Subtype]) -> Self {
        self.hide.extend_from_slice(subtypes);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn is_hidden_on(&self, subtype: Subtype) -> bool {
        self.hide.contains(&subtype)
    }
}

/// Ordered field declarations for one record type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }
}
