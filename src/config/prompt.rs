use std::error::Error;
use std::fmt;
use std::fs;
use std::path::Path;
use log::info;

use super::routes::RouteTable;

const ROUTES_PLACEHOLDER: &str = "{routes}";

const DEFAULT_POLICY: &str = r#"You are a helpful assistant for the University Lost & Found Portal.

IMPORTANT: You are communicating with a simplified text-only client.

1. **Transparency**:
   - When you search, YOU MUST SAY "Searching for [item]..." first.
   - **CRITICAL**: If the tool returns "Found 0 items", you MUST explicitly say: "I checked the database, but I couldn't find any [item] reported as lost/found." Do NOT make up items.
   - If the tool returns an error, tell the user the search could not be completed right now.

2. **Navigation**: If the user wants to go to a page, you MUST output a special tag in your response: "__REDIRECT:/path__".
   - Example: "Sure! I'll take you there. __REDIRECT:/report/lost__"
   - **Valid Paths (ONLY USE THESE)**: {routes}
   - Never invent other paths.

3. **Always Output Text**: NEVER return an empty response. Describe what you are doing.

Always be polite and concise."#;

#[derive(Debug)]
pub enum PromptError {
    MissingPlaceholder(String),
    IoError(std::io::Error),
}

impl fmt::Display for PromptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptError::MissingPlaceholder(path) =>
                write!(f, "Policy file '{}' has no {} placeholder", path, ROUTES_PLACEHOLDER),
            PromptError::IoError(e) => write!(f, "Policy file IO error: {}", e),
        }
    }
}

impl Error for PromptError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PromptError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PromptError {
    fn from(err: std::io::Error) -> Self {
        PromptError::IoError(err)
    }
}

/// The fixed behavioural policy sent as the system prompt of every turn.
#[derive(Debug, Clone)]
pub struct SystemPolicy {
    rendered: String,
}

impl SystemPolicy {
    pub fn new(routes: &RouteTable) -> Self {
        Self::from_template(DEFAULT_POLICY, routes)
    }

    pub fn from_template(template: &str, routes: &RouteTable) -> Self {
        Self {
            rendered: template.replace(ROUTES_PLACEHOLDER, &routes.describe()),
        }
    }

    /// Loads a policy override. The file must list the routes through the
    /// `{routes}` placeholder so the allow-list stays in one place.
    pub fn load(path: &str, routes: &RouteTable) -> Result<Self, PromptError> {
        let template = fs::read_to_string(Path::new(path))?;
        if !template.contains(ROUTES_PLACEHOLDER) {
            return Err(PromptError::MissingPlaceholder(path.to_string()));
        }
        info!("Loaded system policy from: {}", path);
        Ok(Self::from_template(&template, routes))
    }

    pub fn as_str(&self) -> &str {
        &self.rendered
    }

    /// The policy for one request, with the user's current page appended
    /// when the client reported it.
    pub fn for_request(&self, pathname: Option<&str>) -> String {
        match pathname.map(str::trim).filter(|p| !p.is_empty()) {
            Some(path) => format!(
                "{}\n\nThe user is currently viewing the page \"{}\". Do not redirect them to the page they are already on.",
                self.rendered,
                path
            ),
            None => self.rendered.clone(),
        }
    }
}
