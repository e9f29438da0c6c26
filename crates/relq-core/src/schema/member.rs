//! Member definitions for mapped entities.

use super::types::ScalarType;

/// Cardinality of a navigation member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Single related row, joined in place.
    OneToOne,
    /// Related row set, fetched in a second pass.
    OneToMany,
}

/// A navigation declared on an entity member.
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationDef {
    /// Target entity name.
    pub target: String,
    /// Relation cardinality.
    pub cardinality: Cardinality,
    /// The foreign-key member. For `OneToOne` it lives on the owning entity
    /// and equates to the target's key; for `OneToMany` it lives on the
    /// target and equates to the owner's key.
    pub foreign_key: String,
}

/// A member definition within an entity map.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberDef {
    /// Member name as written in expressions.
    pub member: String,
    /// Mapped column name.
    pub column: String,
    /// Scalar type of the column. `None` for navigations.
    pub scalar: Option<ScalarType>,
    /// Whether the column admits NULL.
    pub nullable: bool,
    /// Whether this member is (part of) the entity key.
    pub key: bool,
    /// Ignored members are never selected or inserted.
    pub ignored: bool,
    /// Navigation metadata, when this member points at another entity.
    pub navigation: Option<NavigationDef>,
}

impl MemberDef {
    /// Create a required scalar member mapped to a column of the same name.
    pub fn new(member: impl Into<String>, scalar: ScalarType) -> Self {
        let member = member.into();
        Self {
            column: member.clone(),
            member,
            scalar: Some(scalar),
            nullable: false,
            key: false,
            ignored: false,
            navigation: None,
        }
    }

    /// Create a nullable scalar member.
    pub fn optional(member: impl Into<String>, scalar: ScalarType) -> Self {
        let mut def = Self::new(member, scalar);
        def.nullable = true;
        def
    }

    /// Create a one-to-one navigation member.
    ///
    /// `foreign_key` names the member on this entity whose column equates
    /// to the target's key.
    pub fn one(
        member: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        let member = member.into();
        Self {
            column: member.clone(),
            member,
            scalar: None,
            nullable: false,
            key: false,
            ignored: false,
            navigation: Some(NavigationDef {
                target: target.into(),
                cardinality: Cardinality::OneToOne,
                foreign_key: foreign_key.into(),
            }),
        }
    }

    /// Create a one-to-many navigation member.
    ///
    /// `foreign_key` names the member on the target entity whose column
    /// equates to this entity's key.
    pub fn many(
        member: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        let member = member.into();
        Self {
            column: member.clone(),
            member,
            scalar: None,
            nullable: false,
            key: false,
            ignored: false,
            navigation: Some(NavigationDef {
                target: target.into(),
                cardinality: Cardinality::OneToMany,
                foreign_key: foreign_key.into(),
            }),
        }
    }

    /// Override the mapped column name.
    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    /// Mark as (part of) the entity key.
    pub fn as_key(mut self) -> Self {
        self.key = true;
        self
    }

    /// Exclude from selection and insertion.
    pub fn as_ignored(mut self) -> Self {
        self.ignored = true;
        self
    }

    /// Check if this member is a navigation.
    pub fn is_navigation(&self) -> bool {
        self.navigation.is_some()
    }

    /// Check if this member maps to a selectable column.
    pub fn is_column(&self) -> bool {
        !self.ignored && self.navigation.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_builder() {
        let m = MemberDef::new("Id", ScalarType::Int32).as_key();
        assert_eq!(m.member, "Id");
        assert_eq!(m.column, "Id");
        assert!(m.key);
        assert!(m.is_column());

        let m = MemberDef::optional("Remark", ScalarType::String).with_column("remark_text");
        assert!(m.nullable);
        assert_eq!(m.column, "remark_text");
    }

    #[test]
    fn test_navigation_members() {
        let one = MemberDef::one("Buyer", "User", "BuyerId");
        assert!(one.is_navigation());
        assert!(!one.is_column());
        let nav = one.navigation.unwrap();
        assert_eq!(nav.cardinality, Cardinality::OneToOne);
        assert_eq!(nav.foreign_key, "BuyerId");

        let many = MemberDef::many("Details", "OrderDetail", "OrderId");
        assert_eq!(many.navigation.unwrap().cardinality, Cardinality::OneToMany);
    }

    #[test]
    fn test_ignored_members_not_columns() {
        let m = MemberDef::new("Scratch", ScalarType::String).as_ignored();
        assert!(!m.is_column());
        assert!(!m.is_navigation());
    }
}
