use argh::FromArgs;

use kornia_scan_matching::probability::log_odds;
use kornia_scan_matching::{
    InterpolationMode, OccupiedSpaceCostFunction, OccupiedSpaceOptions, PointCloud,
    SparseOccupancyGrid, VoxelGrid,
};

#[derive(FromArgs)]
/// Sweep the occupied space cost of a synthetic scan along one translation axis
struct Args {
    /// voxel edge length in meters
    #[argh(option, default = "0.05")]
    resolution: f64,

    /// weight of the cost term
    #[argh(option, default = "1.0")]
    scaling_factor: f64,

    /// translation axis to sweep: 0 = x, 1 = y, 2 = z
    #[argh(option, default = "0")]
    axis: usize,

    /// half length of the swept interval in meters
    #[argh(option, default = "0.2")]
    range: f64,

    /// number of samples in the swept interval
    #[argh(option, default = "21")]
    num_samples: usize,

    /// number of hit observations integrated into each wall voxel
    #[argh(option, default = "10")]
    num_hits: usize,

    /// occupancy probability of a single hit observation
    #[argh(option, default = "0.55")]
    hit_probability: f64,

    /// use smoothstep instead of trilinear interpolation
    #[argh(switch)]
    smoothstep: bool,
}

/// A corner made of a floor and two walls, with the scan sampled on it. Wall voxels
/// accumulate `num_hits` observations of `hit_probability` each.
fn make_scene(
    resolution: f64,
    num_hits: usize,
    hit_probability: f64,
) -> Result<(SparseOccupancyGrid, PointCloud), Box<dyn std::error::Error>> {
    if !(0.0..1.0).contains(&hit_probability) {
        return Err(format!("hit probability must be in [0, 1), got {hit_probability}").into());
    }
    let hit = log_odds(hit_probability);
    let extent = (1.0 / resolution).round() as i32;
    let mut grid = SparseOccupancyGrid::new(resolution)?;
    let mut points = Vec::new();
    for i in 0..extent {
        for j in 0..extent {
            for index in [[i, j, 0], [0, i, j], [i, 0, j]] {
                // the corner edges are shared by two walls and get observed twice
                for _ in 0..num_hits {
                    grid.update_log_odds(index, hit)?;
                }
                if (i + j) % 3 == 0 {
                    points.push(grid.center_of_cell(&index));
                }
            }
        }
    }
    Ok((grid, PointCloud::new(points)))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    if args.axis > 2 {
        return Err(format!("axis must be 0, 1 or 2, got {}", args.axis).into());
    }

    let (grid, scan) = make_scene(args.resolution, args.num_hits, args.hit_probability)?;
    println!("Grid: #{} voxels, scan: #{} points", grid.len(), scan.len());

    let interpolation = if args.smoothstep {
        InterpolationMode::Smoothstep
    } else {
        InterpolationMode::Trilinear
    };
    let cost_function = OccupiedSpaceCostFunction::with_options(
        OccupiedSpaceOptions {
            scaling_factor: args.scaling_factor,
            interpolation,
        },
        &scan,
        &grid,
    )?;

    let rotation = [1.0, 0.0, 0.0, 0.0];
    let num_samples = args.num_samples.max(2);
    for k in 0..num_samples {
        let offset = -args.range + 2.0 * args.range * k as f64 / (num_samples - 1) as f64;
        let mut translation = [0.0; 3];
        translation[args.axis] = offset;

        let (residuals, jacobian) = cost_function.evaluate_with_jacobian(&translation, &rotation);
        let cost = 0.5 * residuals.iter().map(|r| r * r).sum::<f64>();
        let gradient = residuals
            .iter()
            .zip(jacobian.iter())
            .map(|(r, row)| r * row[args.axis])
            .sum::<f64>();

        log::debug!("offset {offset:.4}: {} residuals", residuals.len());
        println!("offset: {offset:+.4} cost: {cost:.6} gradient: {gradient:+.6}");
    }

    Ok(())
}
