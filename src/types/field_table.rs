use super::schema::Field;

/// Maps the fields a rule reads to dense slot indices.
///
/// Built during checking by collecting every field referenced in the
/// expression. Compiled nodes refer to fields by slot so the artifact carries
/// each field name once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldTable {
    fields: Vec<Field>,
}

impl FieldTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_fields(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Register a field, returning its slot. If the field is already
    /// registered, returns the existing slot.
    pub(crate) fn register(&mut self, field: Field) -> usize {
        if let Some(slot) = self.fields.iter().position(|f| *f == field) {
            return slot;
        }
        self.fields.push(field);
        self.fields.len() - 1
    }

    /// Look up the field stored at a slot.
    #[must_use]
    pub fn get(&self, slot: usize) -> Option<Field> {
        self.fields.get(slot).copied()
    }

    /// The number of registered fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate over the registered fields in slot order.
    pub fn iter(&self) -> impl Iterator<Item = Field> + '_ {
        self.fields.iter().copied()
    }
}
