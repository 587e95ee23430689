/// Addressing for the conversational-agent backend.
///
/// Sessions live under a project/region/app resource hierarchy; an optional
/// deployment pins a session to a published agent configuration. The REST
/// base and stream endpoint default to the hosted service but stay
/// overridable so tests can target loopback stubs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub project_id: String,
    pub region: String,
    pub app_id: String,
    pub deployment_id: Option<String>,
    pub rest_base: String,
    pub stream_endpoint: String,
}

const DEFAULT_REST_BASE: &str = "https://ces.googleapis.com/v1beta";

impl BackendConfig {
    pub fn new(
        project_id: impl Into<String>,
        region: impl Into<String>,
        app_id: impl Into<String>,
        deployment_id: Option<String>,
    ) -> Self {
        let region = region.into();
        let stream_endpoint = format!("wss://{region}-ces.googleapis.com/v1beta:bidiRunSession");
        Self {
            project_id: project_id.into(),
            region,
            app_id: app_id.into(),
            deployment_id,
            rest_base: DEFAULT_REST_BASE.to_string(),
            stream_endpoint,
        }
    }

    pub fn with_rest_base(mut self, rest_base: impl Into<String>) -> Self {
        self.rest_base = rest_base.into();
        self
    }

    pub fn with_stream_endpoint(mut self, stream_endpoint: impl Into<String>) -> Self {
        self.stream_endpoint = stream_endpoint.into();
        self
    }

    pub fn app_resource_name(&self) -> String {
        format!(
            "projects/{}/locations/{}/apps/{}",
            self.project_id, self.region, self.app_id
        )
    }

    pub fn deployment_resource_name(&self) -> Option<String> {
        self.deployment_id
            .as_deref()
            .map(|deployment_id| format!("{}/deployments/{deployment_id}", self.app_resource_name()))
    }

    pub fn session_name(&self, session_id: &str) -> String {
        format!("{}/sessions/{session_id}", self.app_resource_name())
    }

    pub fn run_session_url(&self, session_id: &str) -> String {
        format!(
            "{}/{}:runSession",
            self.rest_base.trim_end_matches('/'),
            self.session_name(session_id)
        )
    }
}
