use crate::dialog::{DialogGraph, DialogNode, Reply};
use crate::error::GraphError;

/// Node the built-in dialog starts at.
pub const INTRO_START: &str = "100";

/// The built-in test dialog written by `chatai static`.
pub fn intro_dialog() -> Result<DialogGraph, GraphError> {
    let mut graph = DialogGraph::new(DialogNode::npc(
        INTRO_START,
        "Привет! Я тестовый ИИ. Что ты хочешь узнать?",
    ));

    // targets first, so every link resolves when it is added
    graph.add_node(DialogNode::npc("400", "До скорого!"))?;
    graph.add_node(
        DialogNode::npc("300", "Я умею хранить целые диалоги и показывать их игроку.")
            .with_reply("400", "Понятно, пока."),
    )?;
    graph.add_node(
        DialogNode::npc("200", "Я ИИ, запрограммированный для генерации диалогов.")
            .with_reply("300", "А что ты умеешь?")
            .with_reply("400", "Пока."),
    )?;
    graph.add_reply(INTRO_START, Reply::new("200", "Кто ты?"))?;
    graph.add_reply(INTRO_START, Reply::new("300", "Что ты умеешь?"))?;

    Ok(graph)
}
