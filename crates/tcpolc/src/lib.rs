//! Mode dispatch for the tcpolc front end.
//!
//! The binary is a thin shell around [`run_build`]: the `build` mode feeds
//! standard input through the tcpol parser and either renders the requested
//! dumps or fails with the parser's error. The `config` and `check` modes
//! exist for IR-producer handshakes and bypass the engine entirely.

use std::io::BufRead;

use tracing::{debug, info};

use tcpol::error::PolicyResult;
use tcpol::{dump, IrParser};

/// Output selection for `build` mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Render the full policy graph after a successful build.
    pub dump_graph: bool,
    /// Render the simplified qdisc/class hierarchy.
    pub dump_hierarchy: bool,
}

/// Reads policy IR from `input`, builds the graph, and returns the
/// requested renderings (empty when no dump was asked for).
///
/// Any parse defect aborts with the parser's error; the caller maps that
/// to a non-zero exit status.
pub fn run_build<R: BufRead>(input: R, options: BuildOptions) -> PolicyResult<String> {
    let ctx = IrParser::parse_reader(input)?;
    info!(
        blocks = ctx.blocks().len(),
        buckets = ctx.buckets().len(),
        "policy graph built"
    );
    let mut output = String::new();
    if options.dump_graph {
        output.push_str(&dump::context_to_string(&ctx));
    }
    if options.dump_hierarchy {
        output.push_str(&dump::hierarchy_to_string(&ctx));
    }
    Ok(output)
}

/// The `config`/`check` handshake: nothing to do on the engine side.
pub fn run_passthrough(mode: &str) {
    debug!(mode, "mode bypasses the policy engine");
}
