//! `crag chat`: answer one question through the full pipeline.

use anyhow::Result;
use futures::StreamExt;
use std::io::Write;

use catalog_rag_core::models::RetrievalMode;
use catalog_rag_core::pipeline::ChatRequest;

use crate::config::Config;
use crate::context::AppContext;

pub struct ChatOptions {
    pub stream: bool,
    pub thoughts: bool,
    pub mode: RetrievalMode,
    pub top: Option<usize>,
}

pub async fn run_chat(config: &Config, question: &str, opts: ChatOptions) -> Result<()> {
    let ctx = AppContext::from_config(config).await?;

    let mut request = ChatRequest::ask(question);
    request.stream = opts.stream;
    request.context.overrides.retrieval_mode = Some(opts.mode);
    request.context.overrides.top = opts.top;

    let result = if opts.stream {
        stream_answer(&ctx, &request, opts.thoughts).await
    } else {
        whole_answer(&ctx, &request, opts.thoughts).await
    };
    ctx.catalog.close().await;
    result
}

async fn whole_answer(ctx: &AppContext, request: &ChatRequest, thoughts: bool) -> Result<()> {
    let completion = ctx.pipeline.run(request).await?;
    let Some(choice) = completion.choices.first() else {
        println!("(no answer)");
        return Ok(());
    };
    println!("{}", choice.message.content.as_deref().unwrap_or_default());
    if thoughts {
        if let Some(context) = &choice.context {
            print_trace(context);
        }
    }
    Ok(())
}

async fn stream_answer(ctx: &AppContext, request: &ChatRequest, thoughts: bool) -> Result<()> {
    let mut chunks = ctx.pipeline.run_stream(request).await?;
    let mut trace = None;
    let mut stdout = std::io::stdout();

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        for choice in &chunk.choices {
            if let Some(context) = &choice.context {
                trace = Some(context.clone());
            }
            if let Some(text) = &choice.delta.content {
                print!("{}", text);
                stdout.flush()?;
            }
        }
    }
    println!();

    if thoughts {
        if let Some(context) = &trace {
            print_trace(context);
        }
    }
    Ok(())
}

fn print_trace(context: &serde_json::Value) {
    println!();
    println!("sources:");
    if let Some(points) = context["data_points"]["text"].as_array() {
        for p in points {
            println!("  {}", p.as_str().unwrap_or_default());
        }
    }
    let Some(thoughts) = context["thoughts"].as_array() else {
        return;
    };
    for step in thoughts {
        println!();
        println!("== {} ==", step["title"].as_str().unwrap_or_default());
        match &step["description"] {
            serde_json::Value::String(s) => println!("{}", s),
            other => println!(
                "{}",
                serde_json::to_string_pretty(other).unwrap_or_default()
            ),
        }
    }
}
