use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Json;
use handlebars::Handlebars;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use tracing::{debug, info};

use crate::export::ExportNode;
use crate::tree::{PathTree, TreeError};
use crate::Result;

#[derive(Debug, Clone)]
pub struct UiConfig {
    pub addr: String,
    /// Sort files and subdirectories by name instead of insertion order.
    pub sort: bool,
}

pub fn serve(tree: PathTree, config: &UiConfig) -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()?;

    rt.block_on(serve_impl(tree, config))
}

/// Read-only state shared by all requests. The tree is never mutated after
/// it has been built, so no lock is needed.
#[derive(Clone)]
struct UiState {
    tree: Arc<PathTree>,
    handlebars: Arc<Handlebars<'static>>,
    sort: bool,
}

impl UiState {
    fn new(tree: PathTree, sort: bool) -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.register_template_string("index", include_str!("../static/index.hbs"))?;
        Ok(UiState {
            tree: Arc::new(tree),
            handlebars: Arc::new(handlebars),
            sort,
        })
    }

    /// URLs always use `/`, whatever separator the tree was built with.
    fn export_path(
        &self,
        path: &Option<Path<String>>,
    ) -> std::result::Result<ExportNode, TreeError> {
        let path = match path {
            Some(path) => path.as_str(),
            None => "",
        };
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let export = if segments.is_empty() {
            ExportNode::Directory(self.tree.root().to_export())
        } else {
            let separator = self.tree.separator().to_string();
            let node = self.tree.query(&segments.join(&separator))?;
            debug!("exporting {} {:?}", node.kind(), node.name());
            node.to_export()
        };
        Ok(if self.sort { export.sorted() } else { export })
    }
}

fn router(state: UiState) -> axum::Router {
    axum::Router::new()
        .route("/__debug__", get(debug_tree))
        .route("/__data__/", get(data_handler))
        .route("/__data__/*key", get(data_handler))
        .route("/", get(page_handler))
        .route("/*key", get(page_handler))
        .with_state(state)
}

async fn serve_impl(tree: PathTree, config: &UiConfig) -> Result<()> {
    let app = router(UiState::new(tree, config.sort)?);

    let listener = tokio::net::TcpListener::bind(config.addr.as_str()).await?;
    info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Characters that cannot appear raw inside one URL path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'`')
    .add(b'{')
    .add(b'}');

fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT).to_string()
}

#[derive(Debug, serde_derive::Serialize)]
struct Link {
    name: String,
    href: String,
}

#[derive(Debug, serde_derive::Serialize)]
struct Row {
    name: String,
    count: u64,
    href: String,
}

#[derive(Debug, serde_derive::Serialize)]
struct HbsData {
    path: String,
    data_href: String,
    breadcrumbs: Vec<Link>,
    total: u64,
    is_file: bool,
    files: Vec<Row>,
    subdirectories: Vec<Row>,
}

impl HbsData {
    fn new(path: &str, export: ExportNode) -> Self {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut breadcrumbs = Vec::new();
        let mut href = String::new();
        for segment in &segments {
            href.push('/');
            href.push_str(&encode_segment(segment));
            breadcrumbs.push(Link {
                name: segment.to_string(),
                href: href.clone(),
            });
        }
        let child_href = |name: &str| format!("{href}/{}", encode_segment(name));

        let total = export.total();
        let (is_file, files, subdirectories) = match export {
            ExportNode::File(_) => (true, Vec::new(), Vec::new()),
            ExportNode::Directory(directory) => (
                false,
                directory
                    .files
                    .into_iter()
                    .map(|(name, count)| Row {
                        href: child_href(&name),
                        name,
                        count,
                    })
                    .collect(),
                directory
                    .subdirectories
                    .into_iter()
                    .map(|(name, subdirectory)| Row {
                        href: child_href(&name),
                        name,
                        count: subdirectory.total,
                    })
                    .collect(),
            ),
        };

        HbsData {
            path: segments.join("/"),
            data_href: format!("/__data__{href}/"),
            breadcrumbs,
            total,
            is_file,
            files,
            subdirectories,
        }
    }
}

async fn page_handler(
    State(state): State<UiState>,
    path: Option<Path<String>>,
) -> (StatusCode, Html<String>) {
    let export = match state.export_path(&path) {
        Ok(export) => export,
        Err(err) => {
            debug!("page for unknown path: {err}");
            let path = path.map(|p| p.0).unwrap_or_default();
            return (
                StatusCode::NOT_FOUND,
                Html(format!(
                    "ERROR: Could not find \"{}\". Go back to the <a href=\"/\">top</a>.",
                    handlebars::html_escape(&path)
                )),
            );
        }
    };

    let data = HbsData::new(
        path.as_ref().map(|p| p.as_str()).unwrap_or_default(),
        export,
    );
    match state.handlebars.render("index", &data) {
        Ok(html) => (StatusCode::OK, Html(html)),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html(format!("ERROR: {err}")),
        ),
    }
}

async fn data_handler(
    State(state): State<UiState>,
    path: Option<Path<String>>,
) -> std::result::Result<Json<ExportNode>, StatusCode> {
    state
        .export_path(&path)
        .map(Json)
        .map_err(|_| StatusCode::NOT_FOUND)
}

async fn debug_tree(State(state): State<UiState>) -> Html<String> {
    Html(format!("<pre>{:#?}</pre>", state.tree))
}
