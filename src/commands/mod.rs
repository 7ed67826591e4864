//! CLI command handlers

pub mod db;
pub mod dev;
pub mod migration;

/// A titled group of example invocations shown under `--help`
pub struct ExampleGroup {
    pub title: &'static str,
    pub commands: &'static [&'static str],
}

pub struct CommandExamples {
    pub name: &'static str,
    pub groups: &'static [ExampleGroup],
}

pub fn command_examples() -> &'static [CommandExamples] {
    &[
        CommandExamples {
            name: "dev",
            groups: dev::EXAMPLES,
        },
        CommandExamples {
            name: "db",
            groups: db::EXAMPLES,
        },
        CommandExamples {
            name: "migration",
            groups: migration::EXAMPLES,
        },
    ]
}

/// Render example groups as plain help text
pub fn render_examples(groups: &[ExampleGroup]) -> String {
    let mut buffer = String::from("Examples:\n");
    for (index, group) in groups.iter().enumerate() {
        buffer.push_str(&format!("  {}\n", group.title));
        for command in group.commands {
            buffer.push_str(&format!("    $ {}\n", command));
        }
        if index + 1 < groups.len() {
            buffer.push('\n');
        }
    }
    buffer
}
