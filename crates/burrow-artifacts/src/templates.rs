//! Template rendering for artifact generation.
//!
//! Plain jinja syntax with strict undefined handling: a template that
//! references a key missing from its data fails loudly instead of
//! rendering an empty string into a config file.

use minijinja::{Environment, UndefinedBehavior};

use crate::error::{ArtifactError, ArtifactResult};

/// Render one template string against its data.
pub fn render_template(
    name: &str,
    template: &str,
    data: &serde_json::Value,
) -> ArtifactResult<String> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.add_template(name, template)
        .map_err(|source| ArtifactError::Render {
            name: name.to_string(),
            source,
        })?;
    let tmpl = env.get_template(name).map_err(|source| ArtifactError::Render {
        name: name.to_string(),
        source,
    })?;
    tmpl.render(data).map_err(|source| ArtifactError::Render {
        name: name.to_string(),
        source,
    })
}
