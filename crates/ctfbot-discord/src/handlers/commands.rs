//! Slash-command definitions and option parsing.

use serenity::{
    all::{
        CommandInteraction, CommandOptionType, InstallationContext, InteractionContext,
        ResolvedValue,
    },
    builder::{CreateCommand, CreateCommandOption},
};

use ctfbot_core::domain::{
    Attachment, AttachmentCommand, Invocation, ModelChoice, DEFAULT_LIMIT,
};

/// A resolved option value, detached from the interaction payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Arg {
    Attachment(Attachment),
    Integer(i64),
    Boolean(bool),
    Text(String),
}

#[derive(Clone, Debug)]
pub enum ParsedCommand {
    Attachment(Invocation),
    Ask { model_id: String, question: String },
}

/// Usable in guilds, the bot's DMs and private channels.
fn everywhere(cmd: CreateCommand) -> CreateCommand {
    cmd.integration_types(vec![InstallationContext::Guild, InstallationContext::User])
        .contexts(vec![
            InteractionContext::Guild,
            InteractionContext::BotDm,
            InteractionContext::PrivateChannel,
        ])
}

fn file_option(description: &str) -> CreateCommandOption {
    CreateCommandOption::new(CommandOptionType::Attachment, "file", description).required(true)
}

fn line_tool_command(name: &str, description: &str) -> CreateCommand {
    everywhere(
        CreateCommand::new(name)
            .description(description)
            .add_option(file_option("the file to analyze"))
            .add_option(CreateCommandOption::new(
                CommandOptionType::Integer,
                "limit",
                "minimum string length and number of lines shown (1-50, default 4)",
            ))
            .add_option(CreateCommandOption::new(
                CommandOptionType::Boolean,
                "as_file",
                "send the output as a file",
            )),
    )
}

pub fn definitions(models: &[ModelChoice]) -> Vec<CreateCommand> {
    let model_option = models.iter().fold(
        CreateCommandOption::new(CommandOptionType::String, "model", "the model to ask")
            .required(true),
        |opt, m| opt.add_string_choice(m.name.clone(), m.id.clone()),
    );

    vec![
        line_tool_command("strings", "runs the string command on the attached file"),
        line_tool_command("floss", "flosses the attached file"),
        everywhere(
            CreateCommand::new("filetype")
                .description(
                    "reads the magic bytes of the attached file and returns the supposed filetype",
                )
                .add_option(file_option("the file to identify")),
        ),
        everywhere(
            CreateCommand::new("exif")
                .description("reads the exif data of the attached image")
                .add_option(file_option("the image to inspect")),
        ),
        everywhere(
            CreateCommand::new("ask")
                .description("ask an AI a question")
                .add_option(model_option)
                .add_option(
                    CreateCommandOption::new(CommandOptionType::String, "question", "your question")
                        .required(true),
                ),
        ),
    ]
}

pub fn collect_args(command: &CommandInteraction) -> Vec<(String, Arg)> {
    command
        .data
        .options()
        .into_iter()
        .filter_map(|opt| {
            let arg = match opt.value {
                ResolvedValue::Attachment(a) => Arg::Attachment(Attachment {
                    filename: a.filename.clone(),
                    url: a.url.clone(),
                    size: Some(u64::from(a.size)),
                }),
                ResolvedValue::Integer(i) => Arg::Integer(i),
                ResolvedValue::Boolean(b) => Arg::Boolean(b),
                ResolvedValue::String(s) => Arg::Text(s.to_string()),
                _ => return None,
            };
            Some((opt.name.to_string(), arg))
        })
        .collect()
}

fn find<'a>(args: &'a [(String, Arg)], key: &str) -> Option<&'a Arg> {
    args.iter().find(|(name, _)| name == key).map(|(_, v)| v)
}

fn attachment(args: &[(String, Arg)]) -> Option<Attachment> {
    match find(args, "file") {
        Some(Arg::Attachment(a)) => Some(a.clone()),
        _ => None,
    }
}

fn integer(args: &[(String, Arg)], key: &str) -> Option<i64> {
    match find(args, key) {
        Some(Arg::Integer(i)) => Some(*i),
        _ => None,
    }
}

fn flag(args: &[(String, Arg)], key: &str) -> Option<bool> {
    match find(args, key) {
        Some(Arg::Boolean(b)) => Some(*b),
        _ => None,
    }
}

fn text(args: &[(String, Arg)], key: &str) -> String {
    match find(args, key) {
        Some(Arg::Text(s)) => s.clone(),
        _ => String::new(),
    }
}

/// Map a command name and its options onto a core request. Omitted options
/// take their defaults; range checks happen in the pipeline.
pub fn parse(name: &str, args: &[(String, Arg)]) -> Option<ParsedCommand> {
    let limit = integer(args, "limit").unwrap_or(DEFAULT_LIMIT);
    let as_file = flag(args, "as_file").unwrap_or(false);

    let command = match name {
        "strings" => AttachmentCommand::Strings { limit, as_file },
        "floss" => AttachmentCommand::Floss { limit, as_file },
        "filetype" => AttachmentCommand::FileType,
        "exif" => AttachmentCommand::Exif,
        "ask" => {
            return Some(ParsedCommand::Ask {
                model_id: text(args, "model"),
                question: text(args, "question"),
            })
        }
        _ => return None,
    };

    Some(ParsedCommand::Attachment(Invocation::new(
        command,
        attachment(args),
    )))
}
