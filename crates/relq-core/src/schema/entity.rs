//! Entity maps: one entity's table and member bindings.

use crate::error::{Error, Result};

use super::member::{Cardinality, MemberDef, NavigationDef};

/// The mapping of one entity onto a table.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMap {
    /// Entity name as written in queries.
    pub entity: String,
    /// Mapped table name.
    pub table: String,
    /// Members in declaration order.
    pub members: Vec<MemberDef>,
}

impl EntityMap {
    /// Create an entity map.
    pub fn new(entity: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            table: table.into(),
            members: Vec::new(),
        }
    }

    /// Add a member.
    pub fn with_member(mut self, member: MemberDef) -> Self {
        self.members.push(member);
        self
    }

    /// Look up a member by name.
    pub fn member(&self, name: &str) -> Option<&MemberDef> {
        self.members.iter().find(|m| m.member == name)
    }

    /// Look up a member by name, raising an unknown-member error.
    pub fn require_member(&self, name: &str) -> Result<&MemberDef> {
        self.member(name)
            .ok_or_else(|| Error::unknown_member(&self.entity, name))
    }

    /// Look up a navigation member by name.
    pub fn navigation(&self, name: &str) -> Result<&NavigationDef> {
        let member = self.require_member(name)?;
        member.navigation.as_ref().ok_or_else(|| Error::NotANavigation {
            entity: self.entity.clone(),
            member: name.to_string(),
        })
    }

    /// Members that participate in selection and insertion.
    pub fn columns(&self) -> impl Iterator<Item = &MemberDef> {
        self.members.iter().filter(|m| m.is_column())
    }

    /// All key members.
    pub fn key_members(&self) -> impl Iterator<Item = &MemberDef> {
        self.members.iter().filter(|m| m.key)
    }

    /// The single key member, or a composite-key error.
    ///
    /// One-to-many fetch synthesis requires exactly one key column.
    pub fn single_key(&self) -> Result<&MemberDef> {
        let mut keys = self.key_members();
        match (keys.next(), keys.next()) {
            (Some(key), None) => Ok(key),
            _ => Err(Error::CompositeKey {
                entity: self.entity.clone(),
            }),
        }
    }

    /// One-to-many navigations declared on this entity.
    pub fn collection_navigations(&self) -> impl Iterator<Item = &MemberDef> {
        self.members.iter().filter(|m| {
            m.navigation
                .as_ref()
                .is_some_and(|n| n.cardinality == Cardinality::OneToMany)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::ScalarType;

    fn order_map() -> EntityMap {
        EntityMap::new("Order", "sys_order")
            .with_member(MemberDef::new("Id", ScalarType::Int32).as_key())
            .with_member(MemberDef::new("BuyerId", ScalarType::Int32))
            .with_member(MemberDef::optional("Remark", ScalarType::String))
            .with_member(MemberDef::one("Buyer", "User", "BuyerId"))
            .with_member(MemberDef::many("Details", "OrderDetail", "OrderId"))
    }

    #[test]
    fn test_member_lookup() {
        let map = order_map();
        assert!(map.member("BuyerId").is_some());
        assert!(map.member("Missing").is_none());
        assert!(matches!(
            map.require_member("Missing"),
            Err(Error::UnknownMember { .. })
        ));
    }

    #[test]
    fn test_columns_skip_navigations() {
        let map = order_map();
        let cols: Vec<_> = map.columns().map(|m| m.member.as_str()).collect();
        assert_eq!(cols, vec!["Id", "BuyerId", "Remark"]);
    }

    #[test]
    fn test_single_key() {
        let map = order_map();
        assert_eq!(map.single_key().unwrap().member, "Id");

        let composite = EntityMap::new("Pair", "pair")
            .with_member(MemberDef::new("A", ScalarType::Int32).as_key())
            .with_member(MemberDef::new("B", ScalarType::Int32).as_key());
        assert!(matches!(
            composite.single_key(),
            Err(Error::CompositeKey { .. })
        ));
    }

    #[test]
    fn test_navigation_lookup() {
        let map = order_map();
        let nav = map.navigation("Buyer").unwrap();
        assert_eq!(nav.target, "User");
        assert!(matches!(
            map.navigation("Remark"),
            Err(Error::NotANavigation { .. })
        ));
    }
}
