use anyhow::Result;
use swift_grb::{Client, LightCurveOptions, Objects, OutputOptions, PositionOptions};

fn main() -> Result<()> {
    // Example program that calls the library API.
    // Override the endpoint via env vars or a `.swiftgrbrc` file.
    let client = Client::from_env()?;

    let grbs = Objects::names(["GRB 060729", "GRB 070616"]);
    let opts = LightCurveOptions {
        output: OutputOptions {
            return_data: true,
            dest_dir: "lcs".into(),
            ..Default::default()
        },
        ..Default::default()
    };

    if let Some(curves) = client.get_light_curves(&grbs, &opts)? {
        for (grb, lc) in curves.entries() {
            let name = grb.map(|g| g.to_string()).unwrap_or_default();
            for (dataset, table) in lc.iter() {
                println!("{name} {dataset}: {} bins", table.len());
            }
        }
    }

    let positions = client.get_positions(
        &Objects::name("GRB 060729"),
        &PositionOptions {
            output: OutputOptions {
                return_data: true,
                save_data: false,
                ..Default::default()
            },
            ..Default::default()
        },
    )?;
    if let Some((kind, best)) = positions
        .as_ref()
        .and_then(|p| p.as_single())
        .and_then(|p| p.best())
    {
        println!("best position ({kind}): {:?} {:?}", best.ra, best.decl);
    }
    Ok(())
}
