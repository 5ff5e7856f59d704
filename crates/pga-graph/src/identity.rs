//! Identity sub-graph import.
//!
//! Role grants become `User -[HAS_TOKEN]-> Token -[GRANTS]-> Role`, one
//! token per (user, project) assignment scope. A grant without a project is
//! a system-scope grant and its token also carries
//! `-[HAS_SYSTEM_SCOPE]-> SystemScope{all}`. Users never link to roles
//! directly.

use std::collections::BTreeSet;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::model::{
    GraphEdge, GraphNode, NodeLabel, NodeRef, Relationship, RoleNode, SystemScopeNode, TokenNode,
    UserNode,
};
use crate::store::GraphStore;

pub const SYSTEM_SCOPE_ALL: &str = "all";

/// One row of a role-assignment export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub role_id: String,
    pub role_name: String,
}

impl RoleGrant {
    pub fn is_system_scoped(&self) -> bool {
        self.project_id.trim().is_empty()
    }

    pub fn token_id(&self) -> String {
        let scope = if self.is_system_scoped() {
            format!("system:{SYSTEM_SCOPE_ALL}")
        } else {
            self.project_id.clone()
        };
        format!("token:{}@{scope}", self.user_id)
    }

    fn role_key(&self) -> &str {
        if self.role_id.is_empty() {
            &self.role_name
        } else {
            &self.role_id
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySummary {
    pub users: usize,
    pub tokens: usize,
    pub roles: usize,
    pub system_scopes: usize,
    pub grants: usize,
}

pub fn import_identity<S: GraphStore + ?Sized>(
    store: &mut S,
    grants: &[RoleGrant],
) -> Result<IdentitySummary> {
    let mut users = BTreeSet::new();
    let mut tokens = BTreeSet::new();
    let mut roles = BTreeSet::new();
    let mut scopes = BTreeSet::new();
    let mut summary = IdentitySummary::default();

    for grant in grants {
        if grant.user_id.is_empty() || grant.role_name.is_empty() {
            tracing::warn!(?grant, "skipping role grant without user or role");
            continue;
        }

        let user_ref = NodeRef::new(NodeLabel::User, &grant.user_id);
        store.merge_node(GraphNode::User(UserNode {
            id: grant.user_id.clone(),
            name: grant.user_name.clone(),
        }))?;
        users.insert(grant.user_id.clone());

        let token_id = grant.token_id();
        let token_ref = NodeRef::new(NodeLabel::Token, &token_id);
        store.merge_node(GraphNode::Token(TokenNode {
            id: token_id.clone(),
            user_id: grant.user_id.clone(),
            project_id: (!grant.is_system_scoped()).then(|| grant.project_id.clone()),
        }))?;
        tokens.insert(token_id);
        store.merge_edge(GraphEdge::new(
            user_ref,
            Relationship::HasToken,
            token_ref.clone(),
        ))?;

        let role_ref = NodeRef::new(NodeLabel::Role, grant.role_key());
        store.merge_node(GraphNode::Role(RoleNode {
            id: grant.role_key().to_string(),
            name: grant.role_name.clone(),
        }))?;
        roles.insert(grant.role_key().to_string());
        if store
            .merge_edge(GraphEdge::new(token_ref.clone(), Relationship::Grants, role_ref))?
            .is_created()
        {
            summary.grants += 1;
        }

        if grant.is_system_scoped() {
            let scope_ref = NodeRef::new(NodeLabel::SystemScope, SYSTEM_SCOPE_ALL);
            store.merge_node(GraphNode::SystemScope(SystemScopeNode {
                id: SYSTEM_SCOPE_ALL.to_string(),
            }))?;
            scopes.insert(SYSTEM_SCOPE_ALL);
            store.merge_edge(GraphEdge::new(
                token_ref,
                Relationship::HasSystemScope,
                scope_ref,
            ))?;
        }
    }

    summary.users = users.len();
    summary.tokens = tokens.len();
    summary.roles = roles.len();
    summary.system_scopes = scopes.len();
    tracing::info!(
        users = summary.users,
        tokens = summary.tokens,
        roles = summary.roles,
        grants = summary.grants,
        "identity graph imported"
    );
    Ok(summary)
}
