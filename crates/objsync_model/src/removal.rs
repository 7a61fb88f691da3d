//! Removal instructions produced by dependency resolution.

use crate::condition::WhereCondition;
use crate::value::Value;
use std::fmt;

/// What to do with matching rows.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoveAction {
    /// Delete the rows.
    Delete,
    /// Set `column` to `value` on the rows.
    Update {
        /// Column to overwrite.
        column: String,
        /// New value (null or a default object id).
        value: Value,
    },
}

/// How an instruction is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionStrategy {
    /// One store statement scoped by the condition.
    Bulk,
    /// Row by row, running per-object side effects.
    Api,
}

/// One delete or update applied as part of removing an object.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoveDependencyInfo {
    /// Affected type.
    pub object_type: String,
    /// Action.
    pub action: RemoveAction,
    /// Rows affected.
    pub condition: WhereCondition,
    /// Execution strategy.
    pub strategy: ExecutionStrategy,
}

impl RemoveDependencyInfo {
    /// Delete instruction.
    pub fn delete(
        object_type: impl Into<String>,
        condition: WhereCondition,
        strategy: ExecutionStrategy,
    ) -> Self {
        Self {
            object_type: object_type.into(),
            action: RemoveAction::Delete,
            condition,
            strategy,
        }
    }

    /// Update instruction.
    pub fn update(
        object_type: impl Into<String>,
        column: impl Into<String>,
        value: Value,
        condition: WhereCondition,
        strategy: ExecutionStrategy,
    ) -> Self {
        Self {
            object_type: object_type.into(),
            action: RemoveAction::Update {
                column: column.into(),
                value,
            },
            condition,
            strategy,
        }
    }

    /// True for delete instructions.
    pub fn is_delete(&self) -> bool {
        matches!(self.action, RemoveAction::Delete)
    }
}

impl fmt::Display for RemoveDependencyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.strategy {
            ExecutionStrategy::Bulk => "bulk",
            ExecutionStrategy::Api => "api",
        };
        match &self.action {
            RemoveAction::Delete => write!(
                f,
                "[{mode}] DELETE FROM [{}] WHERE {}",
                self.object_type, self.condition
            ),
            RemoveAction::Update { column, value } => write!(
                f,
                "[{mode}] UPDATE [{}] SET {column} = {value} WHERE {}",
                self.object_type, self.condition
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let info = RemoveDependencyInfo::update(
            "blog.article",
            "tag_id",
            Value::Null,
            WhereCondition::eq("tag_id", 3),
            ExecutionStrategy::Bulk,
        );
        assert_eq!(
            info.to_string(),
            "[bulk] UPDATE [blog.article] SET tag_id = NULL WHERE tag_id = 3"
        );
        assert!(!info.is_delete());
    }
}
