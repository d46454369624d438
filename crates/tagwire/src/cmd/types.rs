use serde::Serialize;
use tagwire::demo;
use tagwire_codec::{Tag, TypeRegistry};

use crate::cmd::TypesArgs;
use crate::exit::{codec_error, CliResult, SUCCESS};
use crate::output::{print_json, table, OutputFormat};

#[derive(Serialize)]
struct TypeRow {
    tag: u8,
    name: String,
    parent: Option<String>,
    #[serde(rename = "abstract")]
    is_abstract: bool,
    builtin: bool,
}

#[derive(Serialize)]
struct TypesOutput {
    types: Vec<TypeRow>,
}

pub fn run(_args: TypesArgs, format: OutputFormat) -> CliResult<i32> {
    let registry = demo::registry().map_err(|err| codec_error("registry setup failed", err))?;
    print_types(&collect(&registry), format);
    Ok(SUCCESS)
}

fn collect(registry: &TypeRegistry) -> TypesOutput {
    let types = registry
        .entries()
        .into_iter()
        .map(|(tag, info)| TypeRow {
            tag: tag.value(),
            name: info.name().to_string(),
            parent: (info.parent() != Tag::UNKNOWN).then(|| registry.type_name(info.parent())),
            is_abstract: info.is_abstract(),
            builtin: tag.is_reserved(),
        })
        .collect();
    TypesOutput { types }
}

fn print_types(out: &TypesOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let rendered = table(
                &["TAG", "NAME", "PARENT", "ABSTRACT"],
                out.types.iter().map(|row| {
                    vec![
                        row.tag.to_string(),
                        row.name.clone(),
                        row.parent.clone().unwrap_or_else(|| "-".to_string()),
                        row.is_abstract.to_string(),
                    ]
                }),
            );
            println!("{rendered}");
        }
        OutputFormat::Pretty => {
            for row in &out.types {
                let parent = row.parent.as_deref().unwrap_or("-");
                let kind = if row.is_abstract { " (abstract)" } else { "" };
                println!("{:>3}  {}{kind}  <- {parent}", row.tag, row.name);
            }
        }
    }
}
