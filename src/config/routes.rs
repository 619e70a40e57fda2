use strsim::normalized_levenshtein;

pub const DEFAULT_ROUTES: [&str; 5] = ["/", "/report/lost", "/report/found", "/items", "/dashboard"];

const NEAR_MISS_THRESHOLD: f64 = 0.8;

/// Pages the assistant is allowed to send the user to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTable {
    routes: Vec<String>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new(DEFAULT_ROUTES.iter().map(|r| r.to_string()))
    }
}

impl RouteTable {
    pub fn new<I>(routes: I) -> Self where I: IntoIterator<Item = String> {
        let mut table = Vec::new();
        for route in routes {
            let normalized = normalize(&route);
            if !normalized.is_empty() && !table.contains(&normalized) {
                table.push(normalized);
            }
        }
        Self { routes: table }
    }

    /// Parses a comma separated list. An empty list falls back to the defaults.
    pub fn parse_list(list: &str) -> Self {
        let table = Self::new(
            list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        );
        if table.routes.is_empty() { Self::default() } else { table }
    }

    pub fn routes(&self) -> &[String] {
        &self.routes
    }

    /// Maps a model-supplied path onto an allowed route.
    ///
    /// Exact matches win. Otherwise the closest route is accepted when it is
    /// similar enough, so `/report-lost` lands on `/report/lost`. Anything
    /// else is refused.
    pub fn resolve(&self, raw: &str) -> Option<&str> {
        let path = normalize(raw);
        if path.is_empty() {
            return None;
        }
        if let Some(exact) = self.routes.iter().find(|r| **r == path) {
            return Some(exact.as_str());
        }

        self.routes
            .iter()
            .map(|r| (r, normalized_levenshtein(r, &path)))
            .filter(|(_, score)| *score >= NEAR_MISS_THRESHOLD)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(r, _)| r.as_str())
    }

    pub fn describe(&self) -> String {
        self.routes
            .iter()
            .map(|r| format!("\"{}\"", r))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn normalize(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches(|c| c == '"' || c == '\'');
    let without_query = trimmed.split(|c| c == '?' || c == '#').next().unwrap_or("");
    if without_query.is_empty() || without_query.chars().any(char::is_whitespace) {
        return String::new();
    }
    let mut path = if without_query.starts_with('/') {
        without_query.to_string()
    } else {
        format!("/{}", without_query)
    };
    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    path
}
