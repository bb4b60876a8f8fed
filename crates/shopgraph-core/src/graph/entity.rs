//! Entity type definitions.

/// An entity type: a name, its identity field and its scalar fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityType {
    /// Entity name (unique within a schema).
    pub name: String,
    /// Name of the identity field.
    pub identity_field: String,
    /// Scalar field names in declaration order, identity first.
    pub fields: Vec<String>,
}

impl EntityType {
    /// Create an entity type whose only field is its identity.
    pub fn new(name: impl Into<String>, identity_field: impl Into<String>) -> Self {
        let identity_field = identity_field.into();
        Self {
            name: name.into(),
            fields: vec![identity_field.clone()],
            identity_field,
        }
    }

    /// Add a field.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        if !self.has_field(&field) {
            self.fields.push(field);
        }
        self
    }

    /// Add multiple fields.
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for field in fields {
            self = self.with_field(field);
        }
        self
    }

    /// Check whether a field is declared.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f == name)
    }
}
