use crate::state::Context;

const FEATURES: &str = "**Behind Bars Mod Features:**

🚔 **Jail System** - Complete jail experience with cells, booking, and facilities
💰 **Bail System** - Pay bail to get out of jail early
🔄 **Parole System** - Post-release supervision with LSI risk assessment
🕵️ **Crime Tracking** - Comprehensive criminal records and rap sheets
👮 **NPC System** - Guards, parole officers, and inmates
🖥️ **User Interface** - UIs for jail info, bail, parole status, and more

Ask me about any feature for more details!";

const GUIDE: &str = "**Behind Bars Guides:**

📖 **Jail System** - Ask: \"How does the jail system work?\"
💰 **Bail** - Ask: \"How do I pay bail?\"
🔄 **Parole** - Ask: \"What is parole?\"
🕵️ **Crime Tracking** - Ask: \"How does crime tracking work?\"
🖥️ **UI Guide** - Ask: \"What UIs are available?\"
❓ **FAQ** - Ask: \"What are common questions?\"

Just ask me any question about the mod!";

/// List main features of the Behind Bars mod
#[poise::command(slash_command)]
pub async fn features(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    ctx.say(FEATURES).await?;
    Ok(())
}

/// Get pointers to the Behind Bars guides
#[poise::command(slash_command)]
pub async fn guide(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    ctx.say(GUIDE).await?;
    Ok(())
}
