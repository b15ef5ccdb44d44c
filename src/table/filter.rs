use crate::common::ROW_SIZE;

/// Comparison operators the scan engine understands. The expression
/// this was compiled from, and its column/type checking, are out of
/// scope here; the scan engine only ever sees the opaque result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    LessThanOrEqual,
    GreaterThanOrEqual,
    Less,
    Greater,
}

/// `test(row) -> bool`: an opaque predicate the scan engine applies to
/// each candidate row. Constructing one from a WHERE expression and a
/// schema is a collaborator's concern, not this crate's.
pub trait Filter: Send + Sync {
    fn test(&self, row: &[u8; ROW_SIZE]) -> bool;
}

impl<F> Filter for F
where
    F: Fn(&[u8; ROW_SIZE]) -> bool + Send + Sync,
{
    fn test(&self, row: &[u8; ROW_SIZE]) -> bool {
        self(row)
    }
}

/// A minimal `Filter` over the leading `id: u32` column, used by tests
/// and as a worked example of the trait; a real filter compiler would
/// decode whichever column the WHERE clause names.
pub struct IdCompareFilter {
    target: u32,
    operator: CompareOp,
}

impl IdCompareFilter {
    pub fn new(target: u32, operator: CompareOp) -> Self {
        Self { target, operator }
    }
}

impl Filter for IdCompareFilter {
    fn test(&self, row: &[u8; ROW_SIZE]) -> bool {
        let id = u32::from_le_bytes(row[0..4].try_into().unwrap());
        match self.operator {
            CompareOp::Equal => id == self.target,
            CompareOp::LessThanOrEqual => id <= self.target,
            CompareOp::GreaterThanOrEqual => id >= self.target,
            CompareOp::Less => id < self.target,
            CompareOp::Greater => id > self.target,
        }
    }
}

/// `{ columnName, target, operator }` plus the stop condition that
/// drives `Table::index_scan`'s forward/backward walk.
#[derive(Debug, Clone)]
pub struct IndexCondition {
    pub column_name: String,
    pub target: u32,
    pub operator: CompareOp,
}

impl IndexCondition {
    pub fn new(column_name: impl Into<String>, target: u32, operator: CompareOp) -> Self {
        Self {
            column_name: column_name.into(),
            target,
            operator,
        }
    }

    /// True once the forward/backward walk has passed every key that
    /// could still satisfy this condition.
    pub fn should_end(&self, current_key: u32) -> bool {
        match self.operator {
            CompareOp::LessThanOrEqual => current_key > self.target,
            CompareOp::GreaterThanOrEqual => current_key < self.target,
            CompareOp::Equal => current_key != self.target,
            CompareOp::Less => current_key >= self.target,
            CompareOp::Greater => current_key <= self.target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_end_matches_each_operator() {
        assert!(IndexCondition::new("id", 5, CompareOp::LessThanOrEqual).should_end(6));
        assert!(!IndexCondition::new("id", 5, CompareOp::LessThanOrEqual).should_end(5));

        assert!(IndexCondition::new("id", 5, CompareOp::GreaterThanOrEqual).should_end(4));
        assert!(!IndexCondition::new("id", 5, CompareOp::GreaterThanOrEqual).should_end(5));

        assert!(IndexCondition::new("id", 5, CompareOp::Equal).should_end(4));
        assert!(!IndexCondition::new("id", 5, CompareOp::Equal).should_end(5));

        assert!(IndexCondition::new("id", 5, CompareOp::Less).should_end(5));
        assert!(!IndexCondition::new("id", 5, CompareOp::Less).should_end(4));

        assert!(IndexCondition::new("id", 5, CompareOp::Greater).should_end(5));
        assert!(!IndexCondition::new("id", 5, CompareOp::Greater).should_end(6));
    }

    #[test]
    fn closures_satisfy_filter() {
        let row = {
            let mut r = [0u8; ROW_SIZE];
            r[0..4].copy_from_slice(&7u32.to_le_bytes());
            r
        };
        let f = |row: &[u8; ROW_SIZE]| u32::from_le_bytes(row[0..4].try_into().unwrap()) > 5;
        assert!(f.test(&row));
    }
}
