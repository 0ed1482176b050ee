use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;

use wavebridge::backends::process::ProcessBackend;
use wavebridge::backends::sandbox::SandboxBackend;
use wavebridge::{BackendKind, CanonicalArtifact, CaptureBlob, TranscodeEngine};

#[derive(Parser, Debug)]
#[command(name = "wavebridge")]
#[command(about = "Convert a capture to canonical mono 16 kHz s16le PCM")]
struct Params {
    /// Input audio file (container inferred from the extension).
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Output path. Defaults to stdout.
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Which execution backend runs the filter chain.
    #[arg(short = 'b', long = "backend", value_enum, default_value_t = BackendKind::Sandbox)]
    backend: BackendKind,

    /// Transcoding executable used by the process backend.
    #[arg(long = "ffmpeg", default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    /// Wrap the raw stream in a WAV header (useful for auditioning).
    #[arg(long = "wav", default_value_t = false)]
    wav: bool,
}

fn main() -> Result<()> {
    wavebridge::logging::init();
    let params = Params::parse();

    let bytes = fs::read(&params.input)
        .with_context(|| format!("failed to read input {:?}", params.input))?;
    let container = params
        .input
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    let blob = CaptureBlob::new(bytes, container);

    let engine = match params.backend {
        BackendKind::Process => {
            TranscodeEngine::new(Box::new(ProcessBackend::with_executable(&params.ffmpeg)))
        }
        BackendKind::Sandbox => TranscodeEngine::new(Box::new(SandboxBackend::new())),
    };

    let artifact = engine.convert(&blob)?;

    match &params.output {
        Some(path) => write_artifact_file(path, &artifact, params.wav)?,
        None => {
            if params.wav {
                bail!("--wav requires --output (refusing to write WAV to stdout)");
            }
            let stdout = io::stdout();
            let mut out = stdout.lock();
            out.write_all(artifact.bytes())?;
            out.flush()?;
        }
    }

    eprintln!(
        "{} samples ({:.2}s) via {} backend",
        artifact.sample_count(),
        artifact.duration_secs(),
        engine.backend_kind()
    );
    Ok(())
}

fn write_artifact_file(path: &Path, artifact: &CanonicalArtifact, wav: bool) -> Result<()> {
    if !wav {
        fs::write(path, artifact.bytes())
            .with_context(|| format!("failed to write output {path:?}"))?;
        return Ok(());
    }

    let mut writer = hound::WavWriter::create(path, CanonicalArtifact::wav_spec())
        .with_context(|| format!("failed to create WAV output {path:?}"))?;
    for chunk in artifact.bytes().chunks_exact(2) {
        writer.write_sample(i16::from_le_bytes([chunk[0], chunk[1]]))?;
    }
    writer.finalize().context("failed to finalize WAV output")?;
    Ok(())
}
