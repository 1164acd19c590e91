use std::time::Duration;

use nodeflow::{Blueprint, Config, Context, Node, NodeInfo, PortSpec, Ports, RandomIds};

/// Emits the number of the current frame.
struct Clock {
    frame: u64,
}

impl Node for Clock {
    fn info(&self) -> NodeInfo {
        NodeInfo::new("clock", "counts frames", "1.0")
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::output::<u64>("frame")]
    }

    fn process(&mut self, _: &Context, ports: &mut Ports) -> anyhow::Result<()> {
        self.frame += 1;
        ports.set("frame", self.frame)?;
        Ok(())
    }
}

/// Simulates some work on the frame.
struct Render;

impl Node for Render {
    fn info(&self) -> NodeInfo {
        NodeInfo::new("render", "renders a frame", "1.0")
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::input::<u64>("frame"),
            PortSpec::output::<String>("image"),
        ]
    }

    fn process(&mut self, ctx: &Context, ports: &mut Ports) -> anyhow::Result<()> {
        let frame = ports.input::<u64>("frame")?;
        std::thread::sleep(Duration::from_millis(5));

        if ctx.is_cancelled() {
            anyhow::bail!("render of frame {frame} interrupted");
        }

        ports.set("image", format!("frame #{frame}"))?;
        Ok(())
    }
}

/// Writes every rendered frame, with its number.
struct Display;

impl Node for Display {
    fn info(&self) -> NodeInfo {
        NodeInfo::new("display", "shows frames", "1.0")
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::input::<u64>("frame"),
            PortSpec::input::<String>("image"),
        ]
    }

    fn process(&mut self, _: &Context, ports: &mut Ports) -> anyhow::Result<()> {
        let frame = ports.input::<u64>("frame")?;
        let image = ports.input::<String>("image")?;
        tracing::debug!(frame = *frame, "{image}");
        Ok(())
    }

    fn cleanup(&mut self) {
        tracing::info!("display closed");
    }
}

fn main() -> anyhow::Result<()> {
    nodeflow::logging::init()?;

    let config = Config::from_json(r#"{ "cycle_timeout_ms": 500, "progress": true }"#)?;
    let ctx = Context::from_config(&config);

    let mut blueprint = Blueprint::new();
    let clock = blueprint.add_node(Clock { frame: 0 });
    let render = blueprint.add_node(Render);
    let display = blueprint.add_node(Display);
    blueprint
        .connect(clock, "frame", render, "frame")?
        .connect(clock, "frame", display, "frame")?
        .connect(render, "image", display, "image")?;

    println!("{blueprint}");

    let mut pipeline = blueprint.build(&ctx, &RandomIds)?.with_config(&config);
    let diagnostics = pipeline.run_cycles(100)?;

    println!("{}", diagnostics.render_mermaid(&pipeline));
    Ok(())
}
