use uuid::Uuid;

/// Sample Beverage entity for testing
#[derive(Debug, Clone, PartialEq)]
pub struct Beverage {
    pub id: Uuid,
    pub name: String,
    pub alcoholic: bool,
}

impl Beverage {
    pub fn new(name: &str, alcoholic: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            alcoholic,
        }
    }
}
