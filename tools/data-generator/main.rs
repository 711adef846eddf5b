use clap::Parser;
use rand::{Rng, rngs::ThreadRng};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

/// A CLI tool to generate a synthetic data set for the foodcalc engine
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Directory to write the generated files to
    #[arg(short, long, default_value = "generated")]
    output: String,

    /// Number of plain foods
    #[arg(long, default_value_t = 200)]
    foods: usize,

    /// Number of recipes built from the plain foods
    #[arg(long, default_value_t = 20)]
    recipes: usize,

    /// Number of input lines
    #[arg(long, default_value_t = 1000)]
    lines: usize,

    /// Number of persons in the input, used as the grouping key
    #[arg(long, default_value_t = 10)]
    persons: usize,
}

const NUTRIENTS: [&str; 5] = ["energy", "protein", "fat", "carbs", "water"];
const COOK_TYPES: [&str; 2] = ["boiled", "fried"];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut rng = rand::rng();

    if cli.foods == 0 || cli.persons == 0 {
        eprintln!("Error: --foods and --persons must be at least 1");
        std::process::exit(1);
    }

    let dir = Path::new(&cli.output);
    fs::create_dir_all(dir)?;
    println!(
        "Generating {} foods, {} recipes and {} input lines in '{}'...",
        cli.foods, cli.recipes, cli.lines, cli.output
    );

    fs::write(dir.join("foods.txt"), generate_foods(&mut rng, cli.foods))?;
    println!("-> Generated foods file.");

    let recipe_base = cli.foods + 1;
    fs::write(
        dir.join("recipes.txt"),
        generate_recipes(&mut rng, cli.foods, recipe_base, cli.recipes),
    )?;
    println!("-> Generated recipes file.");

    let max_id = cli.foods + cli.recipes;
    fs::write(
        dir.join("input.txt"),
        generate_input(&mut rng, cli.foods, max_id, cli.lines, cli.persons),
    )?;
    println!("-> Generated input file.");

    fs::write(dir.join("script.fc"), generate_script(cli.recipes > 0))?;
    println!(
        "Successfully generated the data set. Run it with: foodcalc {}",
        dir.join("script.fc").display()
    );

    Ok(())
}

/// Nutrient values are per gram; water is kept below one so the weights add up.
fn generate_foods(rng: &mut ThreadRng, count: usize) -> String {
    let mut out = String::from("foodid,");
    out.push_str(&NUTRIENTS.join(","));
    out.push_str(",waste,boilloss,fryloss\n");
    for id in 1..=count {
        let _ = write!(
            out,
            "{},{:.2},{:.3},{:.3},{:.3},{:.3},{:.2},{:.2},{:.2}",
            id,
            rng.random_range(0.1..9.0),
            rng.random_range(0.0..0.4),
            rng.random_range(0.0..0.6),
            rng.random_range(0.0..0.8),
            rng.random_range(0.0..0.95),
            rng.random_range(0.0..0.3),
            rng.random_range(0.0..0.2),
            rng.random_range(0.0..0.4),
        );
        out.push('\n');
    }
    out
}

fn generate_recipes(rng: &mut ThreadRng, foods: usize, first_id: usize, count: usize) -> String {
    let mut out = String::from("recipeid,foodid,amount\n");
    for recipe in first_id..first_id + count {
        let ingredients = rng.random_range(2..=6);
        for _ in 0..ingredients {
            let _ = writeln!(
                out,
                "{},{},{:.1}",
                recipe,
                rng.random_range(1..=foods),
                rng.random_range(5.0..250.0)
            );
        }
    }
    out
}

/// Lines are sorted on the person key so the script can group by it. Only
/// plain foods get a cooking method.
fn generate_input(
    rng: &mut ThreadRng,
    foods: usize,
    max_id: usize,
    lines: usize,
    persons: usize,
) -> String {
    let mut out = String::from("person,foodid,grams,cook\n");
    let per_person = lines.div_ceil(persons).max(1);
    for line in 0..lines {
        let person = line / per_person + 1;
        let food = rng.random_range(1..=max_id);
        let cook = if food <= foods && rng.random_bool(0.3) {
            rng.random_range(1..=COOK_TYPES.len())
        } else {
            0
        };
        let _ = writeln!(
            out,
            "{},{},{:.1},{}",
            person,
            food,
            rng.random_range(10.0..400.0),
            cook
        );
    }
    out
}

fn generate_script(with_recipes: bool) -> String {
    let mut script = String::from(
        "; generated by foodcalc-data-gen\n\
         foods: foods.txt\n\
         input: input.txt, foodid, grams\n\
         output: output.txt\n\
         non-edible field: waste\n\
         cook: boiled, boilloss, energy, protein, fat, carbs\n\
         cook: fried, fryloss, water\n\
         cook field: cook, boiled, fried\n\
         group set: protein_energy = protein * 17 / energy\n\
         where: energy > 0\n\
         group by: person\n\
         output fields: person, energy, protein, fat, carbs, water, protein_energy\n",
    );
    if with_recipes {
        script.push_str(
            "recipes: recipes.txt\n\
             recipe sum: 100, water, protein, fat, carbs\n\
             ingredients: sum\n",
        );
    }
    script
}
