use kube::core::DynamicObject;
use minijinja::AutoEscape;
use minijinja::Environment;
use minijinja::UndefinedBehavior;
use minijinja::Value as TemplateValue;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use thiserror::Error;
use walkdir::WalkDir;

/* every suffix a manifest template may have */
pub const MANIFEST_FILE_SUFFIX: [&str; 3] = ["yaml", "yml", "json"];

#[derive(Error, Debug)]
pub enum RenderError {

    #[error("manifest {0} not found")]
    NotFound(PathBuf),

    #[error("unable to read {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    /* the template references missing binding data or fails to evaluate */
    #[error("failed to evaluate template {path}: {source}")]
    TemplateEvaluation { path: PathBuf, source: minijinja::Error },

    /* the rendered text is not a valid object document */
    #[error("failed to parse rendered {path}: {reason}")]
    ParseFailure { path: PathBuf, reason: String },
}

/*
 * TemplatingData is the binding context of one render call: `data` is the
 * value tree templates read from, `funcs` are helper functions callable
 * from templates by name.
 */
#[derive(Debug, Default, Clone)]
pub struct TemplatingData {
    pub funcs: BTreeMap<String, TemplateValue>,
    pub data: TemplateValue,
}

impl TemplatingData {

    pub fn new<T: Serialize>(data: &T) -> Self {
	Self{
	    funcs: BTreeMap::new(),
	    data: TemplateValue::from_serialize(data),
	}
    }

    /*
     * Register a helper callable from the templates, e.g:
     *
     *   data.with_func("upper", TemplateValue::from_function(|s: String| s.to_uppercase()))
     */
    pub fn with_func(mut self, name: &str, func: TemplateValue) -> Self {
	self.funcs.insert(name.to_string(), func);
	self
    }
}

/*
 * Renderer turns a fixed set of manifest templates into objects. Files are
 * rendered in ascending lexicographic order of their path, always.
 */
#[derive(Debug, Clone)]
pub struct Renderer {
    files: Vec<PathBuf>,
}

#[derive(Debug, Copy, Clone)]
enum Dialect {
    Yaml,
    Json,
}

fn dialect_of(path: &Path) -> Option<Dialect> {
    match path.extension().and_then(|ext| ext.to_str()) {
	Some("yaml") | Some("yml") => Some(Dialect::Yaml),
	Some("json") => Some(Dialect::Json),
	_ => None,
    }
}

fn parse_failure(path: &Path, reason: impl ToString) -> RenderError {
    RenderError::ParseFailure{
	path: path.to_path_buf(),
	reason: reason.to_string(),
    }
}

/*
 * A rendered document must look like a kubernetes object, at least:
 *
 *   apiVersion: <string>
 *   kind: <string>
 *   metadata:
 *     name: <string>
 */
fn to_object(path: &Path, doc: JsonValue) -> Result<DynamicObject, RenderError> {
    if !doc.is_object() {
	return Err(parse_failure(path, "document is not a mapping"));
    }
    for field in ["/apiVersion", "/kind", "/metadata/name"] {
	if !doc.pointer(field).map(|v| v.is_string()).unwrap_or(false) {
	    return Err(parse_failure(path, format!("missing or non-string {}", field)));
	}
    }

    serde_json::from_value(doc).map_err(|err| parse_failure(path, err))
}

impl Renderer {

    pub fn new(mut files: Vec<PathBuf>) -> Self {
	files.sort();
	Self{ files: files }
    }

    pub fn files(&self) -> &[PathBuf] {
	&self.files
    }

    /*
     * Render every file against `data`. Either every object is returned or
     * none: the first failing file fails the whole call.
     */
    pub fn render_objects(&self, data: &TemplatingData) -> Result<Vec<DynamicObject>, RenderError> {
	let mut objs: Vec<DynamicObject> = vec![];

	for file in &self.files {
	    let mut rendered = self.render_file(file, data)?;
	    log::trace!("Rendered {} object(s) from {}", rendered.len(), file.display());
	    objs.append(&mut rendered);
	}

	Ok(objs)
    }

    fn render_file(&self, path: &Path, data: &TemplatingData) -> Result<Vec<DynamicObject>, RenderError> {
	let dialect = match dialect_of(path) {
	    Some(dialect) => dialect,
	    None => return Err(parse_failure(path, "unsupported manifest suffix")),
	};

	let source = match std::fs::read_to_string(path) {
	    Ok(source) => source,
	    Err(err) if err.kind() == io::ErrorKind::NotFound => {
		return Err(RenderError::NotFound(path.to_path_buf()));
	    },
	    Err(err) => {
		return Err(RenderError::Io{ path: path.to_path_buf(), source: err });
	    }
	};
	let name = path.display().to_string();

	let mut env = Environment::new();
	env.set_undefined_behavior(UndefinedBehavior::Strict);
	env.set_auto_escape_callback(|_| AutoEscape::None);
	env.set_keep_trailing_newline(true);
	for (func_name, func) in &data.funcs {
	    env.add_global(func_name.clone(), func.clone());
	}

	let evaluation_failure = |err: minijinja::Error| RenderError::TemplateEvaluation{
	    path: path.to_path_buf(),
	    source: err,
	};
	let text = env.template_from_named_str(&name, &source)
	    .and_then(|tmpl| tmpl.render(&data.data))
	    .map_err(evaluation_failure)?;

	let mut objs: Vec<DynamicObject> = vec![];
	match dialect {
	    Dialect::Json => {
		let doc: JsonValue = serde_json::from_str(&text).map_err(|err| parse_failure(path, err))?;
		objs.push(to_object(path, doc)?);
	    },
	    Dialect::Yaml if text.trim().is_empty() => {
		log::debug!("{} rendered to nothing", name);
	    },
	    Dialect::Yaml => {
		for de in serde_yaml::Deserializer::from_str(&text) {
		    let doc = JsonValue::deserialize(de).map_err(|err| parse_failure(path, err))?;

		    /* `---` separators around empty documents */
		    if doc.is_null() {
			continue;
		    }
		    objs.push(to_object(path, doc)?);
		}
	    }
	}

	Ok(objs)
    }
}

/*
 * Find every file under `dir` (recursively) ending in one of `suffixes`,
 * sorted by path.
 */
pub fn files_with_suffix(dir: &Path, suffixes: &[&str]) -> Result<Vec<PathBuf>, RenderError> {
    let mut files: Vec<PathBuf> = vec![];

    for entry in WalkDir::new(dir).sort_by_file_name() {
	let entry = entry.map_err(|err| {
	    let path = err.path().unwrap_or(dir).to_path_buf();
	    match err.into_io_error() {
		Some(err) if err.kind() == io::ErrorKind::NotFound => RenderError::NotFound(path),
		Some(err) => RenderError::Io{ path: path, source: err },
		None => RenderError::Io{ path: path, source: io::Error::new(io::ErrorKind::Other, "filesystem loop") },
	    }
	})?;

	if !entry.file_type().is_file() {
	    continue;
	}
	let matches = entry.path()
	    .extension()
	    .and_then(|ext| ext.to_str())
	    .map(|ext| suffixes.contains(&ext))
	    .unwrap_or(false);
	if matches {
	    files.push(entry.into_path());
	}
    }
    files.sort();

    Ok(files)
}
