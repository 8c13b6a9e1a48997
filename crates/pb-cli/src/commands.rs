use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use colored::Colorize;
use pb_header::{compute_header_size, has_header, read_header};
use pb_ops::{BridgeConfig, BridgeSession, DownloadOp, OpAttrs, OpContext, UploadOp, UploadPlan};
use pb_types::{DType, Element, ObjectId, Tensor, TensorDescriptor, TensorShape};
use serde_json::json;
use tracing::debug;

use crate::cli::*;

const PREVIEW_LEN: usize = 8;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Put(args) => cmd_put(&config, args, cli.format),
        Command::Get(args) => cmd_get(&config, args, cli.format),
        Command::Inspect(args) => cmd_inspect(&config, args, cli.format),
        Command::HeaderSize(args) => cmd_header_size(args, cli.format),
        Command::Id(args) => cmd_id(args, cli.format),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<BridgeConfig> {
    match path {
        Some(path) => {
            debug!(path = %path.display(), "loading session config");
            Ok(BridgeConfig::load(path)?)
        }
        None => Ok(BridgeConfig::default()),
    }
}

/// A 40-digit hex string is taken as a literal id; anything else is a name.
fn parse_id(s: &str) -> anyhow::Result<ObjectId> {
    if s.len() == 40 && s.chars().all(|c| c.is_ascii_hexdigit()) {
        return Ok(ObjectId::from_hex(s)?);
    }
    if s.is_empty() {
        bail!("object id must not be empty");
    }
    Ok(ObjectId::derive(s))
}

fn parse_dtype(s: &str) -> anyhow::Result<DType> {
    let dtype: DType = s.parse()?;
    if !dtype.is_supported() {
        bail!("dtype {dtype} cannot be stored");
    }
    Ok(dtype)
}

fn parse_shape(s: &str) -> anyhow::Result<TensorShape> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(TensorShape::new(Vec::new()));
    }
    let dims = s
        .split(',')
        .map(|d| {
            d.trim()
                .parse::<u64>()
                .with_context(|| format!("invalid dimension {d:?}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(TensorShape::new(dims))
}

fn open_session(
    config: &BridgeConfig,
    store: Option<&str>,
    timeout_ms: Option<i64>,
) -> anyhow::Result<Arc<BridgeSession>> {
    let mut config = config.clone();
    if let Some(store) = store {
        config.store_socket = store.to_string();
    }
    if let Some(ms) = timeout_ms {
        config.get_timeout_ms = ms;
    }
    let session = BridgeSession::new(config)?;
    session.connect(&session.config().connect_params())?;
    Ok(Arc::new(session))
}

/// Device sessions get a private compute stream for the transfer.
fn op_context(session: &BridgeSession) -> anyhow::Result<OpContext> {
    match session.device() {
        Some(device) => Ok(OpContext::on_stream(device.create_stream("cli")?)),
        None => Ok(OpContext::host()),
    }
}

fn put(config: &BridgeConfig, args: &PutArgs) -> anyhow::Result<(ObjectId, UploadPlan)> {
    let dtype = parse_dtype(&args.dtype)?;
    let width = dtype.element_size()?;
    let mut inputs = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        if bytes.len() % width != 0 {
            bail!(
                "{}: {} bytes is not a whole number of {dtype} elements",
                path.display(),
                bytes.len()
            );
        }
        let elements = (bytes.len() / width) as u64;
        inputs.push(Tensor::from_bytes(dtype, vec![elements], bytes)?);
    }

    let id = parse_id(&args.id)?;
    let session = open_session(config, args.store.as_deref(), None)?;
    let attrs = OpAttrs::from(session.config()).with_dtypes(vec![dtype; inputs.len()]);
    let op = UploadOp::new(Arc::clone(&session), attrs)?;
    let plan = op.plan(&inputs, id.binary())?;
    let ctx = op_context(&session)?;
    op.compute(&ctx, &inputs, id.binary()).wait()?;
    session.shutdown()?;
    Ok((id, plan))
}

fn cmd_put(config: &BridgeConfig, args: PutArgs, format: OutputFormat) -> anyhow::Result<()> {
    let (id, plan) = put(config, &args)?;
    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({
                "id": id.to_hex(),
                "dtype": plan.dtype.name(),
                "elements": plan.shape.num_elements(),
                "payload_bytes": plan.total_bytes(),
                "offsets": plan.offsets,
            })
        ),
        OutputFormat::Text => {
            println!("{} Sealed {}", "✓".green().bold(), id.to_hex().yellow());
            println!("  Inputs: {}", args.files.len());
            println!("  Shape: {} {}", plan.dtype.name().cyan(), plan.shape);
            println!("  Payload: {} bytes", plan.total_bytes().to_string().bold());
        }
    }
    Ok(())
}

fn get(config: &BridgeConfig, args: &GetArgs) -> anyhow::Result<(ObjectId, Tensor)> {
    let dtype = parse_dtype(&args.dtype)?;
    let id = parse_id(&args.id)?;
    let session = open_session(config, args.store.as_deref(), args.timeout_ms)?;
    let op = DownloadOp::new(
        Arc::clone(&session),
        OpAttrs::from(session.config()).with_dtype(dtype),
    )?;
    let ctx = op_context(&session)?;
    let tensor = op.compute(&ctx, id.binary()).wait()?;
    session.shutdown()?;
    Ok((id, tensor))
}

fn cmd_get(config: &BridgeConfig, args: GetArgs, format: OutputFormat) -> anyhow::Result<()> {
    let (id, tensor) = get(config, &args)?;
    if let Some(out) = &args.out {
        fs::write(out, tensor.to_bytes()).with_context(|| format!("writing {}", out.display()))?;
    }
    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({
                "id": id.to_hex(),
                "dtype": tensor.dtype().name(),
                "shape": tensor.shape().dims(),
                "bytes": tensor.total_bytes(),
                "preview": preview(&tensor, PREVIEW_LEN),
            })
        ),
        OutputFormat::Text => {
            println!("{} {}", "Object".bold(), id.to_hex().yellow());
            println!("  Tensor: {} {}", tensor.dtype().name().cyan(), tensor.shape());
            match &args.out {
                Some(out) => println!(
                    "  {} {} bytes to {}",
                    "wrote".green(),
                    tensor.total_bytes(),
                    out.display()
                ),
                None => println!("  Values: [{}]", preview(&tensor, PREVIEW_LEN)),
            }
        }
    }
    Ok(())
}

fn render<T: Element + std::fmt::Display>(tensor: &Tensor, limit: usize) -> Option<String> {
    let values = tensor.to_vec::<T>().ok()?;
    let mut out: Vec<String> = values.iter().take(limit).map(|v| v.to_string()).collect();
    if values.len() > limit {
        out.push("...".into());
    }
    Some(out.join(", "))
}

/// First `limit` values, or leading bytes in hex for dtypes without a
/// native element type.
fn preview(tensor: &Tensor, limit: usize) -> String {
    let rendered = match tensor.dtype() {
        DType::Bool => render::<bool>(tensor, limit),
        DType::Int8 => render::<i8>(tensor, limit),
        DType::Int16 => render::<i16>(tensor, limit),
        DType::Int32 => render::<i32>(tensor, limit),
        DType::Int64 => render::<i64>(tensor, limit),
        DType::UInt8 => render::<u8>(tensor, limit),
        DType::UInt16 => render::<u16>(tensor, limit),
        DType::UInt32 => render::<u32>(tensor, limit),
        DType::UInt64 => render::<u64>(tensor, limit),
        DType::Float32 => render::<f32>(tensor, limit),
        DType::Float64 => render::<f64>(tensor, limit),
        _ => None,
    };
    rendered.unwrap_or_else(|| {
        tensor.storage().read(|bytes| {
            bytes
                .iter()
                .take(limit * 2)
                .map(|b| format!("{b:02x}"))
                .collect::<Vec<_>>()
                .join(" ")
        })
    })
}

/// What `inspect` reports about one object.
struct ObjectInfo {
    id: ObjectId,
    size: usize,
    metadata_len: usize,
    header: Option<(TensorDescriptor, usize)>,
}

fn inspect(config: &BridgeConfig, args: &InspectArgs) -> anyhow::Result<ObjectInfo> {
    let id = parse_id(&args.id)?;
    let session = open_session(config, args.store.as_deref(), None)?;
    let buffer = session
        .connection()
        .get(&id, Some(Duration::ZERO))
        .with_context(|| format!("no sealed object {}", id.to_hex()))?;
    let header = buffer.read(|bytes| -> anyhow::Result<_> {
        if !has_header(bytes) {
            return Ok(None);
        }
        Ok(Some(read_header(bytes)?))
    })?;
    let info = ObjectInfo {
        id,
        size: buffer.len(),
        metadata_len: buffer.metadata().len(),
        header,
    };
    session.shutdown()?;
    Ok(info)
}

fn cmd_inspect(config: &BridgeConfig, args: InspectArgs, format: OutputFormat) -> anyhow::Result<()> {
    let info = inspect(config, &args)?;
    match format {
        OutputFormat::Json => {
            let header = info.header.as_ref().map(|(d, offset)| {
                json!({
                    "dtype": d.dtype.name(),
                    "shape": d.shape.dims(),
                    "header_bytes": offset,
                })
            });
            println!(
                "{}",
                json!({
                    "id": info.id.to_hex(),
                    "size": info.size,
                    "metadata_bytes": info.metadata_len,
                    "header": header,
                })
            );
        }
        OutputFormat::Text => {
            println!("{} {}", "Object".bold(), info.id.to_hex().yellow());
            println!("  Size: {} bytes ({} metadata)", info.size, info.metadata_len);
            match &info.header {
                Some((d, offset)) => {
                    println!("  Header: {} bytes", offset);
                    println!("  Tensor: {} {}", d.dtype.name().cyan(), d.shape);
                    println!("  Payload: {} bytes", info.size - offset);
                }
                None => println!("  {}", "raw object (no header)".dimmed()),
            }
        }
    }
    Ok(())
}

fn cmd_header_size(args: HeaderSizeArgs, format: OutputFormat) -> anyhow::Result<()> {
    let dtype: DType = args.dtype.parse()?;
    let shape = parse_shape(&args.shape)?;
    let size = compute_header_size(dtype, &shape)
        .map_err(|e| anyhow!("{dtype} {shape}: {e}"))?;
    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({ "dtype": dtype.name(), "shape": shape.dims(), "header_bytes": size })
        ),
        OutputFormat::Text => println!("{} {} -> {} bytes", dtype.name().cyan(), shape, size.to_string().bold()),
    }
    Ok(())
}

fn cmd_id(args: IdArgs, format: OutputFormat) -> anyhow::Result<()> {
    let id = ObjectId::derive(&args.name);
    match format {
        OutputFormat::Json => println!("{}", json!({ "name": args.name, "id": id.to_hex() })),
        OutputFormat::Text => println!("{}", id.to_hex()),
    }
    Ok(())
}
