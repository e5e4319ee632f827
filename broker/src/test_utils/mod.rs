//! In-memory fakes for the collaborator interfaces, shared by unit and
//! integration tests.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header};
use tokio::sync::Mutex;
use url::Url;

use elevate_common::{Error, GroupId, ProjectId, UserId};

use crate::clients::analyzer::{AnalysisResponse, PolicyAnalyzer};
use crate::clients::inventory::{AssetInventory, PolicyInfo};
use crate::clients::{
    Binding, BindingOption, ConditionExpression, Directory, JustificationPolicy, JwtOracle,
    MailFlag, Mailer, ResourceManager,
};

/// A policy analyzer backed by canned responses.
///
/// Discovery queries (those carrying a permission filter) are answered
/// from `discovery`; per-project entitlement queries from
/// `entitlements`, keyed by the resource filter; principal queries from
/// `principals`, keyed by the resource.
#[derive(Clone, Default)]
pub struct StubPolicyAnalyzer {
    pub discovery: Arc<Mutex<AnalysisResponse>>,
    pub entitlements: Arc<Mutex<HashMap<String, AnalysisResponse>>>,
    pub principals: Arc<Mutex<HashMap<String, AnalysisResponse>>>,
    pub calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl PolicyAnalyzer for StubPolicyAnalyzer {
    async fn find_accessible_resources_by_user(
        &self,
        scope: &str,
        user: &UserId,
        permission_filter: Option<&str>,
        resource_filter: Option<&str>,
        expand_groups: bool,
    ) -> Result<AnalysisResponse, Error> {
        self.calls.lock().await.push(format!(
            "find_accessible_resources_by_user {scope} {user} {permission_filter:?} {resource_filter:?} {expand_groups}"
        ));
        if permission_filter.is_some() {
            return Ok(self.discovery.lock().await.clone());
        }
        Ok(self
            .entitlements
            .lock()
            .await
            .get(resource_filter.unwrap_or_default())
            .cloned()
            .unwrap_or_default())
    }

    async fn find_permissioned_principals_by_resource(
        &self,
        scope: &str,
        resource: &str,
        role: &str,
    ) -> Result<AnalysisResponse, Error> {
        self.calls
            .lock()
            .await
            .push(format!("find_permissioned_principals_by_resource {scope} {resource} {role}"));
        Ok(self
            .principals
            .lock()
            .await
            .get(resource)
            .cloned()
            .unwrap_or_default())
    }
}

/// An asset inventory backed by canned effective policies.
#[derive(Clone, Default)]
pub struct StubAssetInventory {
    pub policies: Arc<Mutex<HashMap<ProjectId, Vec<PolicyInfo>>>>,
    /// When set, every fetch fails with a transient error.
    pub outage: Arc<Mutex<Option<String>>>,
}

#[async_trait]
impl AssetInventory for StubAssetInventory {
    async fn get_effective_iam_policies(
        &self,
        _scope: &str,
        project: &ProjectId,
    ) -> Result<Vec<PolicyInfo>, Error> {
        if let Some(outage) = self.outage.lock().await.clone() {
            return Err(Error::Transient(anyhow::anyhow!(outage)));
        }
        Ok(self
            .policies
            .lock()
            .await
            .get(project)
            .cloned()
            .unwrap_or_default())
    }
}

/// A directory with static memberships. Groups listed in `denied` fail
/// member listing with `AccessDenied`.
#[derive(Clone, Default)]
pub struct StubDirectory {
    pub memberships: Arc<Mutex<HashMap<UserId, Vec<GroupId>>>>,
    pub members: Arc<Mutex<HashMap<GroupId, Vec<UserId>>>>,
    pub denied: Arc<Mutex<HashSet<GroupId>>>,
}

#[async_trait]
impl Directory for StubDirectory {
    async fn list_direct_group_memberships(&self, user: &UserId) -> Result<Vec<GroupId>, Error> {
        Ok(self
            .memberships
            .lock()
            .await
            .get(user)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_direct_group_members(&self, group: &GroupId) -> Result<Vec<UserId>, Error> {
        if self.denied.lock().await.contains(group) {
            return Err(Error::AccessDenied(format!("cannot read {group}")));
        }
        Ok(self
            .members
            .lock()
            .await
            .get(group)
            .cloned()
            .unwrap_or_default())
    }
}

/// One recorded policy mutation.
#[derive(Clone, Debug)]
pub struct AppliedBinding {
    pub project: ProjectId,
    pub binding: Binding,
    pub options: BTreeSet<BindingOption>,
    pub rationale: String,
}

/// A resource manager that records mutations instead of applying them.
/// Roles listed in `failing_roles` fail with a transient error, after
/// recording nothing.
#[derive(Clone, Default)]
pub struct RecordingResourceManager {
    pub search_results: Arc<Mutex<BTreeSet<ProjectId>>>,
    pub applied: Arc<Mutex<Vec<AppliedBinding>>>,
    pub failing_roles: Arc<Mutex<HashSet<String>>>,
    pub calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ResourceManager for RecordingResourceManager {
    async fn search_project_ids(&self, query: &str) -> Result<BTreeSet<ProjectId>, Error> {
        self.calls
            .lock()
            .await
            .push(format!("search_project_ids {query}"));
        Ok(self.search_results.lock().await.clone())
    }

    async fn add_project_iam_binding(
        &self,
        project: &ProjectId,
        binding: &Binding,
        options: &BTreeSet<BindingOption>,
        rationale: &str,
    ) -> Result<(), Error> {
        self.calls
            .lock()
            .await
            .push(format!("add_project_iam_binding {project} {}", binding.role));
        if self.failing_roles.lock().await.contains(&binding.role) {
            return Err(Error::Transient(anyhow::anyhow!(
                "backend unavailable for {}",
                binding.role
            )));
        }
        self.applied.lock().await.push(AppliedBinding {
            project: project.clone(),
            binding: binding.clone(),
            options: options.clone(),
            rationale: rationale.to_string(),
        });
        Ok(())
    }
}

/// A signing oracle that signs locally with a symmetric key. The token
/// shape matches production; only the key handling differs.
pub struct LocalJwtOracle {
    identity: String,
    secret: Vec<u8>,
}

impl LocalJwtOracle {
    pub fn new(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            secret: format!("{identity}-signing-secret").into_bytes(),
        }
    }
}

#[async_trait]
impl JwtOracle for LocalJwtOracle {
    fn signing_identity(&self) -> &str {
        &self.identity
    }

    async fn sign_jwt(&self, claims: &str) -> Result<String, Error> {
        let claims: serde_json::Value =
            serde_json::from_str(claims).map_err(|err| Error::Transient(anyhow::Error::new(err)))?;
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&self.secret),
        )
        .map_err(|err| Error::Transient(anyhow::Error::new(err)))
    }

    fn jwks_url(&self) -> Url {
        Url::parse(&format!("https://oracle.invalid/{}/jwks", self.identity))
            .expect("static url is valid")
    }

    async fn decoding_keys(&self) -> Result<Vec<(Algorithm, DecodingKey)>, Error> {
        Ok(vec![(
            Algorithm::HS256,
            DecodingKey::from_secret(&self.secret),
        )])
    }
}

/// Accepts every justification.
#[derive(Clone, Default)]
pub struct AllowAllJustifications;

impl JustificationPolicy for AllowAllJustifications {
    fn check_justification(&self, _user: &UserId, _justification: &str) -> Result<(), Error> {
        Ok(())
    }

    fn hint(&self) -> String {
        "any reason".to_string()
    }
}

#[derive(Clone, Debug)]
pub struct SentMail {
    pub to: BTreeSet<UserId>,
    pub cc: BTreeSet<UserId>,
    pub subject: String,
    pub body: String,
    pub flags: BTreeSet<MailFlag>,
}

/// A mailer that records outgoing messages.
#[derive(Clone, Default)]
pub struct RecordingMailer {
    pub sent: Arc<Mutex<Vec<SentMail>>>,
    pub broken: Arc<Mutex<bool>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_mail(
        &self,
        to: &BTreeSet<UserId>,
        cc: &BTreeSet<UserId>,
        subject: &str,
        html_body: &str,
        flags: &BTreeSet<MailFlag>,
    ) -> Result<(), Error> {
        if *self.broken.lock().await {
            return Err(Error::Transient(anyhow::anyhow!("smtp unavailable")));
        }
        self.sent.lock().await.push(SentMail {
            to: to.clone(),
            cc: cc.clone(),
            subject: subject.to_string(),
            body: html_body.to_string(),
            flags: flags.clone(),
        });
        Ok(())
    }
}

/// A condition with the given title and expression.
pub fn condition(title: Option<&str>, expression: &str) -> ConditionExpression {
    ConditionExpression {
        title: title.map(str::to_string),
        expression: Some(expression.to_string()),
        description: None,
    }
}

/// A binding for one role with prefixed members.
pub fn binding(role: &str, members: &[&str], condition: Option<ConditionExpression>) -> Binding {
    Binding {
        role: role.to_string(),
        members: members.iter().map(|member| member.to_string()).collect(),
        condition,
    }
}
