//! ovino - run one inference through the OpenVINO bindings
//!
//! Lists devices, prints the model's ports, compiles it with the configured
//! options, feeds every input a constant tensor and prints the top-k scores
//! of each output.

mod settings;

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use ovino_core::{ElementType, Engine, InferContext, InferRequest, Model, PortInfo};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use settings::{Args, RunMode, Settings};

fn init_logging(level: &str) -> Result<()> {
    let level: Level = level
        .parse()
        .with_context(|| format!("invalid log level '{}'", level))?;
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to set tracing subscriber")
}

fn describe_ports(kind: &str, ports: &[PortInfo]) {
    for (index, port) in ports.iter().enumerate() {
        info!(
            "{} #{}: {} {} {}",
            kind, index, port.name, port.element_type, port.shape
        );
    }
}

fn bind_inputs(request: &mut InferRequest, model: &Model, settings: &Settings) -> Result<()> {
    for port in model.inputs()? {
        let shape = port
            .shape
            .resolve(&settings.dims)
            .with_context(|| format!("cannot size input '{}'", port.name))?;
        let n = shape.element_count()?;
        let fill = settings.fill_value;
        let name = port.name.as_str();
        match port.element_type {
            ElementType::F32 => request.set_input_tensor(name, &vec![fill; n], shape.clone(), port.element_type),
            ElementType::F64 => request.set_input_tensor(name, &vec![fill as f64; n], shape.clone(), port.element_type),
            ElementType::I64 => request.set_input_tensor(name, &vec![fill as i64; n], shape.clone(), port.element_type),
            ElementType::I32 => request.set_input_tensor(name, &vec![fill as i32; n], shape.clone(), port.element_type),
            ElementType::U8 => request.set_input_tensor(name, &vec![fill as u8; n], shape.clone(), port.element_type),
            other => bail!("input '{}' has element type {} which the CLI cannot fill", name, other),
        }
        .with_context(|| format!("failed to bind input '{}'", name))?;
        info!(input = name, shape = %shape, "input bound");
    }
    Ok(())
}

async fn run(request: &mut InferRequest, settings: &Settings) -> Result<()> {
    match settings.mode {
        RunMode::Sync => request.infer()?,
        RunMode::Async => {
            let ctx = if settings.timeout_ms > 0 {
                InferContext::with_timeout(Duration::from_millis(settings.timeout_ms))
            } else {
                InferContext::background()
            };
            request.run_async(&ctx).await?
        }
    }
    Ok(())
}

fn top_k(scores: &[f32], k: usize) -> Vec<(usize, f32)> {
    let mut ranked: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(k);
    ranked
}

fn print_outputs(request: &InferRequest, model: &Model, k: usize) -> Result<()> {
    for port in model.outputs()? {
        let tensor = request.get_output_tensor(port.name.as_str())?;
        let shape = tensor.shape()?;
        let scores = match tensor.element_type()? {
            ElementType::F32 => tensor.data_as_f32()?,
            ElementType::F64 => tensor.data_as_f64()?.into_iter().map(|v| v as f32).collect(),
            other => {
                println!("{} {}: {} output, {} elements", port.name, shape, other, tensor.size()?);
                continue;
            }
        };
        println!("{} {}:", port.name, shape);
        for (rank, (index, score)) in top_k(&scores, k).into_iter().enumerate() {
            println!("  {:>2}. [{:>5}] {:.6}", rank + 1, index, score);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut settings = Settings::load(args.config.as_deref()).context("failed to load settings")?;
    if args.force_async {
        settings.mode = RunMode::Async;
    }
    init_logging(&settings.log_level)?;

    info!("=== ovino v{} ===", env!("CARGO_PKG_VERSION"));

    let model_path = args
        .model
        .or_else(|| settings.model.clone())
        .context("no model given; pass a path or set `model` in ovino.toml")?;

    let engine = Engine::shared().context("OpenVINO runtime unavailable")?;
    let devices = engine.available_devices()?;
    info!("available devices: {}", devices.join(", "));

    let model = engine
        .read_model(&model_path)
        .with_context(|| format!("failed to read model {}", model_path.display()))?;
    describe_ports("input", &model.inputs()?);
    describe_ports("output", &model.outputs()?);

    let compiled = engine
        .compile_with_config(&model, &settings.compile)
        .with_context(|| format!("failed to compile for {}", settings.compile.device))?;
    for (key, value) in compiled.properties().iter() {
        info!("  {} = {}", key, value);
    }

    let mut request = compiled.create_infer_request()?;
    bind_inputs(&mut request, &model, &settings)?;

    let started = Instant::now();
    run(&mut request, &settings).await.context("inference failed")?;
    info!(mode = ?settings.mode, elapsed_ms = started.elapsed().as_secs_f64() * 1e3, "inference complete");

    print_outputs(&request, &model, settings.top_k)?;

    if settings.compile.enable_profiling {
        for entry in request.profiling_info()? {
            println!(
                "{:<24} {:<16} {:<12} {:?} {:?}",
                entry.node_name, entry.node_type, entry.exec_type, entry.status, entry.real_time
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_k() {
        let ranked = top_k(&[0.1, 0.7, f32::NAN, 0.3, 0.9], 3);
        assert_eq!(ranked.len(), 3);
        assert!(ranked[0].1.is_nan());
        assert_eq!(ranked[1], (4, 0.9));
        assert_eq!(ranked[2], (1, 0.7));
        assert!(top_k(&[], 5).is_empty());
    }
}
