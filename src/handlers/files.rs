//! File upload dialog, file list and download

use crate::engine::{Reply, Response};
use crate::views;
use tracing::info;

crate::handler!(pub UploadStart, "upload", |ctx| {
    if ctx.account_id().await?.is_none() {
        return Ok(Response::reply(views::REGISTER_FIRST));
    }
    Ok(Response::reply(views::UPLOAD_ASK_FILE).goto("wait_for_file"))
});

crate::handler!(pub ReceiveFile, "upload_file", |ctx| {
    let event = ctx.event;
    let Some(document) = event.attached_document() else {
        return Ok(Response::new());
    };
    let Some(account_id) = ctx.account_id().await? else {
        return Ok(Response::reply(views::REGISTER_FIRST).end());
    };

    let path = ctx.app.files.save(account_id, document).await?;
    let record = ctx
        .storage()
        .add_file(account_id, &document.file_name, &path)
        .await?;
    info!(account_id, file_id = record.id, file_name = %record.file_name, "File stored");
    Ok(Response::reply(views::file_saved(&record.file_name)).end())
});

crate::handler!(pub ExpectFile, "upload_expect_file", |_ctx| {
    Ok(Response::reply(views::UPLOAD_EXPECT_FILE).retry())
});

crate::handler!(pub ListFiles, "list_files", |ctx| {
    let Some(account_id) = ctx.account_id().await? else {
        return Ok(Response::reply(views::REGISTER_FIRST));
    };
    let files = ctx.storage().list_files(account_id).await?;
    if files.is_empty() {
        return Ok(Response::reply(views::NO_FILES));
    }
    Ok(Response::new().choices(views::FILES_HEADER, views::file_choices(&files)))
});

crate::handler!(pub Download, "download_file", |ctx| {
    let event = ctx.event;
    let Some(account_id) = ctx.account_id().await? else {
        return Ok(Response::reply(views::REGISTER_FIRST));
    };
    let file_id = event
        .callback_data()
        .and_then(|data| data.strip_prefix(views::CALLBACK_DOWNLOAD_PREFIX))
        .and_then(|id| id.parse::<i64>().ok());
    let file = match file_id {
        Some(file_id) => ctx.storage().find_file(account_id, file_id).await?,
        None => None,
    };
    Ok(match file {
        Some(file) => Response::new().push(Reply::document(file.file_path, file.file_name)),
        None => Response::reply(views::FILE_NOT_FOUND),
    })
});
