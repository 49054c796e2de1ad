use std::{io::Write, time::SystemTime};

use clap::Args;
use mqttbench_lib::payload::PayloadTemplate;
use rama::{
    error::{BoxError, ErrorContext as _},
    graceful::ShutdownGuard,
    telemetry::tracing,
};
use rand::{SeedableRng as _, rngs::SmallRng};

use crate::config::PayloadFormat;

#[derive(Debug, Clone, Args)]
/// print resolved payloads, to preview a template without a broker
pub struct PayloadCommand {
    /// payload template, supporting the `${createTs}` and `${randN}` placeholders
    #[arg(long, default_value = "hello world")]
    payload: String,

    /// how the payload is interpreted
    #[arg(long, value_enum, default_value_t = PayloadFormat::Txt)]
    payload_format: PayloadFormat,

    /// amount of payloads to print
    #[arg(long, value_name = "N", default_value_t = 1)]
    samples: usize,

    /// seed for the `${randN}` placeholders, random if not defined
    #[arg(long)]
    seed: Option<u64>,
}

pub async fn exec(_guard: ShutdownGuard, args: PayloadCommand) -> Result<(), BoxError> {
    let mut stdout = std::io::stdout().lock();
    write_samples(&mut stdout, &args)
}

fn write_samples<W: Write>(out: &mut W, args: &PayloadCommand) -> Result<(), BoxError> {
    let spec = args
        .payload_format
        .parse(&args.payload)
        .context("parse payload")?;
    let template = PayloadTemplate::try_compile(&spec).context("invalid payload")?;

    let mut rng = match args.seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_os_rng(),
    };

    tracing::debug!(
        samples = args.samples,
        is_static = template.is_static(),
        "render payload samples",
    );

    for _ in 0..args.samples {
        let payload = template.render(SystemTime::now(), &mut rng);
        out.write_all(&payload)
            .and_then(|_| out.write_all(b"\n"))
            .context("write payload sample")?;
    }
    out.flush().context("flush payload samples")
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Debug, Parser)]
    struct Cli {
        #[command(flatten)]
        payload: PayloadCommand,
    }

    fn samples(argv: &[&str]) -> Result<Vec<String>, BoxError> {
        let args = Cli::try_parse_from(std::iter::once("mqttbench").chain(argv.iter().copied()))
            .unwrap()
            .payload;
        let mut out = Vec::new();
        write_samples(&mut out, &args)?;
        Ok(String::from_utf8(out)
            .unwrap()
            .lines()
            .map(ToOwned::to_owned)
            .collect())
    }

    #[test]
    fn test_default_payload() {
        assert_eq!(samples(&[]).unwrap(), vec!["hello world"]);
    }

    #[test]
    fn test_random_placeholders() {
        let lines = samples(&["--payload", "id-${rand6}", "--samples", "3"]).unwrap();
        assert_eq!(lines.len(), 3);
        for line in &lines {
            let suffix = line.strip_prefix("id-").unwrap();
            assert_eq!(suffix.len(), 6);
            assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn test_seeded_samples_are_reproducible() {
        let argv = ["--payload", "${rand8}", "--samples", "2", "--seed", "42"];
        assert_eq!(samples(&argv).unwrap(), samples(&argv).unwrap());
    }

    #[test]
    fn test_json_object_payload() {
        let lines = samples(&[
            "--payload",
            r#"{"ts": "${createTs}", "n": 1}"#,
            "--payload-format",
            "jo",
        ])
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert!(value["ts"].as_str().unwrap().parse::<u64>().is_ok());
        assert_eq!(value["n"], 1);
    }

    #[test]
    fn test_invalid_payload_format() {
        assert!(samples(&["--payload", "[1, 2]", "--payload-format", "jo"]).is_err());
    }

    #[test]
    fn test_oversized_random_string_is_rejected() {
        assert!(samples(&["--payload", "${rand1099511627776000}"]).is_err());
        assert!(samples(&["--payload", "${rand268435456}"]).is_err());
    }
}
