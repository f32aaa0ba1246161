//! Definition file loading and import resolution.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use apiflow_core::definition::Definition;
use apiflow_core::imports::{detect_kind, parse_csv_table, ImportKind, ImportSource};

/// A definition file with its import tree fully loaded.
#[derive(Debug)]
pub struct LoadedDefinition {
    /// Routine name, taken from the file stem.
    pub name: String,
    pub definition: Definition,
    pub imports: HashMap<String, ImportSource>,
}

/// Load a definition file and every import reachable from it.
///
/// Import paths resolve relative to the directory of the file that
/// declares them.
pub fn load_definition(path: &Path) -> Result<LoadedDefinition> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading definition file {}", path.display()))?;
    let definition: Definition = serde_yaml::from_str(&text)
        .with_context(|| format!("parsing definition file {}", path.display()))?;

    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "definition".to_string());

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let imports = match &definition {
        Definition::Test(test) => load_imports(&test.import, base)?,
        Definition::Api(api) => load_imports(&api.import, base)?,
        _ => HashMap::new(),
    };

    Ok(LoadedDefinition { name, definition, imports })
}

fn load_imports(
    entries: &HashMap<String, String>,
    base: &Path,
) -> Result<HashMap<String, ImportSource>> {
    let mut sources = HashMap::new();
    for (alias, relative) in entries {
        let path = base.join(relative);
        sources.insert(alias.clone(), load_import(&path, alias)?);
    }
    Ok(sources)
}

fn load_import(path: &Path, alias: &str) -> Result<ImportSource> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading import {:?} from {}", alias, path.display()))?;

    match detect_kind(&path.to_string_lossy(), &text) {
        ImportKind::Csv => Ok(ImportSource::Table(parse_csv_table(&text))),
        ImportKind::Api | ImportKind::Test => {
            let definition: Definition = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing import {:?} ({})", alias, path.display()))?;
            match definition {
                Definition::Api(api) => Ok(ImportSource::Api(api)),
                Definition::Test(test) => {
                    let base = path.parent().unwrap_or_else(|| Path::new("."));
                    let imports = load_imports(&test.import, base)?;
                    Ok(ImportSource::Test { definition: test, imports })
                }
                other => bail!(
                    "import {:?} ({}) has kind {}, which is not callable",
                    alias,
                    path.display(),
                    other.kind()
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_test_with_api_and_csv_imports() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "get_user.yaml",
            "type: api\nurl: http://svc/users\nextract:\n  id: $body[id]\n",
        );
        write(dir.path(), "users.csv", "name,age\njohn,20\n");
        let main = write(
            dir.path(),
            "suite.yaml",
            concat!(
                "type: test\n",
                "import:\n",
                "  get_user: get_user.yaml\n",
                "  users: users.csv\n",
                "steps:\n",
                "  - step: call\n",
                "    target: get_user\n",
            ),
        );

        let loaded = load_definition(&main).unwrap();
        assert_eq!(loaded.name, "suite");
        assert!(matches!(loaded.definition, Definition::Test(_)));
        assert!(matches!(loaded.imports.get("get_user"), Some(ImportSource::Api(_))));
        match loaded.imports.get("users") {
            Some(ImportSource::Table(rows)) => assert_eq!(rows.len(), 1),
            other => panic!("expected table import, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_test_imports_resolve_relative() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("shared");
        fs::create_dir(&sub).unwrap();
        write(&sub, "ping.yaml", "type: api\nurl: http://svc/ping\n");
        write(
            &sub,
            "child.yaml",
            "type: test\nimport:\n  ping: ping.yaml\nsteps:\n  - step: call\n    target: ping\n",
        );
        let main = write(
            dir.path(),
            "outer.yaml",
            "type: test\nimport:\n  child: shared/child.yaml\nsteps:\n  - step: call\n    target: child\n",
        );

        let loaded = load_definition(&main).unwrap();
        match loaded.imports.get("child") {
            Some(ImportSource::Test { imports, .. }) => {
                assert!(matches!(imports.get("ping"), Some(ImportSource::Api(_))));
            }
            other => panic!("expected nested test import, got {:?}", other),
        }
    }

    #[test]
    fn test_non_callable_import_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "notes.yaml", "type: doc\nbody: nothing\n");
        let main = write(
            dir.path(),
            "suite.yaml",
            "type: test\nimport:\n  notes: notes.yaml\nsteps: []\n",
        );

        let err = load_definition(&main).unwrap_err();
        assert!(err.to_string().contains("not callable"));
    }
}
