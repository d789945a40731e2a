use crate::error::ParseError;
use crate::manifest::Manifest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Json,
    Yaml,
    Auto,
}

#[derive(Debug, Clone)]
pub struct ParsedManifest {
    pub manifest: Manifest,
    pub format: ManifestFormat,
}

pub fn parse_manifest_str(input: &str, format: ManifestFormat) -> Result<ParsedManifest, ParseError> {
    match format {
        ManifestFormat::Json => Ok(ParsedManifest {
            manifest: serde_json::from_str(input)?,
            format,
        }),
        ManifestFormat::Yaml => Ok(ParsedManifest {
            manifest: serde_yaml::from_str(input)?,
            format,
        }),
        ManifestFormat::Auto => parse_manifest_auto(input),
    }
}

fn parse_manifest_auto(input: &str) -> Result<ParsedManifest, ParseError> {
    let trimmed = input.trim_start();
    if trimmed.is_empty() {
        return Err(ParseError::UnknownFormat);
    }
    if trimmed.starts_with('{') {
        return match serde_json::from_str::<Manifest>(input) {
            Ok(manifest) => Ok(ParsedManifest {
                manifest,
                format: ManifestFormat::Json,
            }),
            // JSON is a subset of YAML; fall back before giving up
            Err(e) => match serde_yaml::from_str::<Manifest>(input) {
                Ok(manifest) => Ok(ParsedManifest {
                    manifest,
                    format: ManifestFormat::Yaml,
                }),
                Err(_) => Err(ParseError::Json(e)),
            },
        };
    }

    match serde_yaml::from_str::<Manifest>(input) {
        Ok(manifest) => Ok(ParsedManifest {
            manifest,
            format: ManifestFormat::Yaml,
        }),
        Err(e) => {
            if let Ok(manifest) = serde_json::from_str::<Manifest>(input) {
                return Ok(ParsedManifest {
                    manifest,
                    format: ManifestFormat::Json,
                });
            }
            Err(ParseError::Yaml(e))
        }
    }
}
