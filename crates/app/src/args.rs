//! Flag parsing for the generation subcommands.

use anyhow::{anyhow, bail, Result};
use shared::{BotType, TaskParams};

fn value<'a>(
    iter: &mut impl Iterator<Item = &'a String>,
    flag: &str,
) -> Result<String> {
    iter.next()
        .cloned()
        .ok_or_else(|| anyhow!("{} needs a value", flag))
}

/// Parse `imagine` arguments: first bare argument is the prompt, the rest
/// are knob flags.
pub fn parse_imagine(args: &[String]) -> Result<TaskParams> {
    let mut params = TaskParams::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--aspect" => params.aspect = value(&mut iter, "--aspect")?,
            "--version" => params.version = value(&mut iter, "--version")?,
            "--quality" => params.quality = value(&mut iter, "--quality")?,
            "--style" => params.style = value(&mut iter, "--style")?,
            "--no" => params.no = value(&mut iter, "--no")?,
            "--chaos" => params.chaos = value(&mut iter, "--chaos")?.parse()?,
            "--stylize" => params.stylize = value(&mut iter, "--stylize")?.parse()?,
            "--stop" => params.stop = value(&mut iter, "--stop")?.parse()?,
            "--seed" => params.seed = value(&mut iter, "--seed")?.parse()?,
            "--weird" => params.weird = value(&mut iter, "--weird")?.parse()?,
            "--cref" => params.cref_urls.push(value(&mut iter, "--cref")?),
            "--cw" => params.cw = value(&mut iter, "--cw")?.parse()?,
            "--tile" => params.tile = true,
            "--custom" => params.custom_param = true,
            "--niji" => params.bot_type = BotType::Niji,
            other if !other.starts_with("--") && params.text_prompt.is_empty() => {
                params.text_prompt = other.to_string();
            }
            other => bail!("unknown imagine flag: {}", other),
        }
    }
    Ok(params)
}

/// Parse `sd` arguments into (prompt, extra form fields).
pub fn parse_one_shot(args: &[String]) -> Result<(String, Vec<(String, String)>)> {
    let mut prompt = String::new();
    let mut extras = Vec::new();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--aspect-ratio" => {
                extras.push(("aspect_ratio".into(), value(&mut iter, "--aspect-ratio")?));
            }
            "--negative" => {
                extras.push(("negative_prompt".into(), value(&mut iter, "--negative")?));
            }
            "--format" => {
                extras.push(("output_format".into(), value(&mut iter, "--format")?));
            }
            "--seed" => extras.push(("seed".into(), value(&mut iter, "--seed")?)),
            other if !other.starts_with("--") && prompt.is_empty() => prompt = other.to_string(),
            other => bail!("unknown sd flag: {}", other),
        }
    }
    Ok((prompt, extras))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn imagine_prompt_and_flags() {
        let params = parse_imagine(&strings(&[
            "a red fox",
            "--aspect",
            "16:9",
            "--chaos",
            "40",
            "--stop",
            "80",
            "--tile",
        ]))
        .unwrap();
        assert_eq!(params.text_prompt, "a red fox");
        assert_eq!(params.aspect, "16:9");
        assert_eq!(params.chaos, 40);
        assert_eq!(params.stop, 80);
        assert!(params.tile);
        assert!(!params.custom_param);
    }

    #[test]
    fn imagine_custom_and_niji() {
        let params = parse_imagine(&strings(&["fox", "--custom", "--niji"])).unwrap();
        assert!(params.custom_param);
        assert_eq!(params.bot_type, BotType::Niji);
    }

    #[test]
    fn imagine_rejects_unknown_flags() {
        assert!(parse_imagine(&strings(&["fox", "--wat"])).is_err());
    }

    #[test]
    fn imagine_flag_without_value_errors() {
        assert!(parse_imagine(&strings(&["fox", "--aspect"])).is_err());
    }

    #[test]
    fn one_shot_extras_map_to_form_fields() {
        let (prompt, extras) = parse_one_shot(&strings(&[
            "a lighthouse",
            "--aspect-ratio",
            "21:9",
            "--format",
            "png",
        ]))
        .unwrap();
        assert_eq!(prompt, "a lighthouse");
        assert_eq!(
            extras,
            vec![
                ("aspect_ratio".to_string(), "21:9".to_string()),
                ("output_format".to_string(), "png".to_string()),
            ]
        );
    }
}
