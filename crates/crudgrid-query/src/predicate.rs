use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Lt,
    Gt,
    Lte,
    Gte,
    Eq,
    Ne,
}

impl Comparator {
    /// Maps a textual operator onto its comparator. The negated comparison
    /// operators map straight to their complements.
    pub fn from_operator(op: &str) -> Option<Self> {
        let comparator = match op {
            "<" => Comparator::Lt,
            ">" => Comparator::Gt,
            "<=" => Comparator::Lte,
            ">=" => Comparator::Gte,
            "=" | "==" => Comparator::Eq,
            "!=" | "!==" => Comparator::Ne,
            "!<" => Comparator::Gte,
            "!>" => Comparator::Lte,
            "!<=" => Comparator::Gt,
            "!>=" => Comparator::Lt,
            _ => return None,
        };
        Some(comparator)
    }

    pub fn query_operator(self) -> &'static str {
        match self {
            Comparator::Lt => "$lt",
            Comparator::Gt => "$gt",
            Comparator::Lte => "$lte",
            Comparator::Gte => "$gte",
            Comparator::Eq => "$eq",
            Comparator::Ne => "$ne",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Test {
    Compare { comparator: Comparator, value: Bson },
    IsNull,
    IsNotNull,
    /// Case-insensitive substring.
    Contains { text: String, negated: bool },
    /// Case-sensitive whole-value match.
    Exact { text: String, negated: bool },
    Regex {
        pattern: String,
        flags: String,
        negated: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub test: Test,
}

/// OR-of-AND-of-condition tree for one or more fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Condition(Condition),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn condition(field: &str, test: Test) -> Self {
        Predicate::Condition(Condition {
            field: field.to_string(),
            test,
        })
    }

    pub fn compare(field: &str, comparator: Comparator, value: impl Into<Bson>) -> Self {
        Self::condition(
            field,
            Test::Compare {
                comparator,
                value: value.into(),
            },
        )
    }

    /// AND of `children`, collapsing the zero- and one-child cases.
    pub fn all(mut children: Vec<Predicate>) -> Option<Self> {
        match children.len() {
            0 => None,
            1 => children.pop(),
            _ => Some(Predicate::And(children)),
        }
    }

    /// OR of `children`, collapsing the zero- and one-child cases.
    pub fn any(mut children: Vec<Predicate>) -> Option<Self> {
        match children.len() {
            0 => None,
            1 => children.pop(),
            _ => Some(Predicate::Or(children)),
        }
    }

    /// Lowers the tree into a storage-native query document.
    ///
    /// - `And` / `Or` become `$and` / `$or` arrays, so grouping survives
    /// - comparisons become `{ field: { $op: value } }`
    /// - null tests become `{ field: { $eq: null } }` / `{ field: { $ne: null } }`
    /// - text tests become `$eq` / `$ne` or `$regex`, wrapped in `$not` when negated
    pub fn to_document(&self) -> Document {
        match self {
            Predicate::And(children) => logical("$and", children),
            Predicate::Or(children) => logical("$or", children),
            Predicate::Condition(condition) => condition.to_document(),
        }
    }
}

impl Condition {
    pub fn to_document(&self) -> Document {
        let operators = match &self.test {
            Test::Compare { comparator, value } => single(comparator.query_operator(), value.clone()),
            Test::IsNull => single("$eq", Bson::Null),
            Test::IsNotNull => single("$ne", Bson::Null),
            Test::Exact { text, negated } => {
                let op = if *negated { "$ne" } else { "$eq" };
                single(op, Bson::String(text.clone()))
            }
            Test::Contains { text, negated } => {
                negate(regex_operators(&regex::escape(text), "i"), *negated)
            }
            Test::Regex {
                pattern,
                flags,
                negated,
            } => negate(regex_operators(pattern, flags), *negated),
        };

        let mut doc = Document::new();
        doc.insert(self.field.clone(), operators);
        doc
    }
}

fn logical(op: &str, children: &[Predicate]) -> Document {
    let clauses: Vec<Bson> = children
        .iter()
        .map(|child| Bson::Document(child.to_document()))
        .collect();
    single(op, Bson::Array(clauses))
}

fn single(key: &str, value: Bson) -> Document {
    let mut doc = Document::new();
    doc.insert(key, value);
    doc
}

fn regex_operators(pattern: &str, flags: &str) -> Document {
    let mut doc = single("$regex", Bson::String(pattern.to_string()));
    if !flags.is_empty() {
        doc.insert("$options", flags);
    }
    doc
}

fn negate(operators: Document, negated: bool) -> Document {
    if negated {
        single("$not", Bson::Document(operators))
    } else {
        operators
    }
}
