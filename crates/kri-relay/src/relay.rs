//! Data retrieval over the authenticated portal session.

use serde::Serialize;

use crate::client::{PortalResponse, RequestStep};
use crate::error::RelayResult;
use crate::portal::{find_failure_marker, PAPERS_COLUMNS, PROJECTS_COLUMNS, SEARCH_COLUMNS};
use crate::session::{stale_session, PortalSession, SessionLease};
use crate::sheet::{decode, ColumnSpec, Record};

/// One sheet response: the raw text alongside its decoded records, so callers
/// can fall back to the raw text if the decoder drifts from the portal.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetResult {
    pub status: u16,
    pub content_type: Option<String>,
    pub raw: String,
    pub records: Vec<Record>,
}

impl SheetResult {
    fn from_response(response: PortalResponse, spec: &ColumnSpec) -> Self {
        let records = decode(&response.body, spec);
        Self {
            status: response.status,
            content_type: response.content_type().map(str::to_string),
            raw: response.body,
            records,
        }
    }
}

/// Papers and research projects of one researcher.
#[derive(Debug, Clone, Serialize)]
pub struct Achievements {
    pub papers: SheetResult,
    pub projects: SheetResult,
}

/// Column list overrides for [`Relay::fetch_achievements`].
#[derive(Debug, Clone, Default)]
pub struct ColumnOverrides {
    pub papers: Option<String>,
    pub projects: Option<String>,
}

/// Entry point for callers: turns subject lookups into decoded sheet records.
pub struct Relay {
    session: PortalSession,
}

impl Relay {
    pub fn new(session: PortalSession) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &PortalSession {
        &self.session
    }

    /// Papers and projects registered under a national researcher number.
    pub async fn fetch_achievements(
        &self,
        researcher_no: &str,
        overrides: &ColumnOverrides,
    ) -> RelayResult<Achievements> {
        let papers_spec = overrides.papers.as_deref().unwrap_or(PAPERS_COLUMNS);
        let projects_spec = overrides.projects.as_deref().unwrap_or(PROJECTS_COLUMNS);
        let endpoints = self.session.endpoints();
        let papers_step = endpoints.papers(researcher_no, papers_spec);
        let projects_step = endpoints.projects(researcher_no, projects_spec);

        let (generation, papers, projects) = {
            let lease = self.session.lease().await?;
            let (papers, projects) =
                tokio::try_join!(lease.send(&papers_step), lease.send(&projects_step))?;
            (lease.generation(), papers, projects)
        };
        self.reject_stale(generation, &[&papers, &projects]).await?;

        tracing::debug!(
            papers_status = papers.status,
            projects_status = projects.status,
            "Fetched achievement sheets"
        );

        Ok(Achievements {
            papers: SheetResult::from_response(papers, &ColumnSpec::parse(papers_spec)),
            projects: SheetResult::from_response(projects, &ColumnSpec::parse(projects_spec)),
        })
    }

    /// Researchers matching a name, optionally narrowed to an organization.
    pub async fn search_researchers(
        &self,
        name: &str,
        organization: Option<&str>,
        column_spec: Option<&str>,
    ) -> RelayResult<SheetResult> {
        let spec = column_spec.unwrap_or(SEARCH_COLUMNS);
        let step = self
            .session
            .endpoints()
            .search(name, organization.unwrap_or_default(), spec);

        let (generation, response) = self.send_leased(&step).await?;
        self.reject_stale(generation, &[&response]).await?;
        Ok(SheetResult::from_response(response, &ColumnSpec::parse(spec)))
    }

    async fn send_leased(&self, step: &RequestStep) -> RelayResult<(u64, PortalResponse)> {
        let lease: SessionLease<'_> = self.session.lease().await?;
        let response = lease.send(step).await?;
        Ok((lease.generation(), response))
    }

    /// A cached session the portal no longer honours answers data calls with
    /// a login failure page; drop it so the next call logs in again, unless a
    /// newer login has replaced it in the meantime.
    async fn reject_stale(&self, generation: u64, responses: &[&PortalResponse]) -> RelayResult<()> {
        let marker = responses.iter().find_map(|r| find_failure_marker(&r.body));
        match marker {
            Some(reason) => {
                tracing::warn!(generation, "Portal rejected the cached session: {reason}");
                self.session.invalidate_generation(generation).await;
                Err(stale_session(reason))
            }
            None => Ok(()),
        }
    }
}
