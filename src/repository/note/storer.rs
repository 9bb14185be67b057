//! Append-only writes to the commit-notes attestation bundle.
//!
//! A store reads the commit's existing JSONL bundle, refuses to touch a
//! corrupt one, appends the new envelopes as compact JSON lines, and
//! commits an updated notes tree. The layout decision: keep the note
//! where it was; a new note goes sharded when the repository already
//! shards (any two-character top-level tree directory), flat otherwise.
//!
//! Every mutation lands in fresh objects and the ref update is the
//! single commit step, so an aborted store leaves no partial state. A
//! failed push leaves the local ref updated for the caller to retry.

use tracing::debug;

use crate::envelope::{jsonl, Envelope};
use crate::errors::{Error, Result};

use super::locator::{NoteLocator, Transport};
use super::{
    notes_tree, open_or_clone, read_note_blob, remote_callbacks, COMMIT_AUTHOR_EMAIL,
    COMMIT_AUTHOR_NAME, NOTES_REF,
};

/// Stores envelopes as notes for the locator's commit.
pub(super) fn store(
    locator: &NoteLocator,
    push: Option<bool>,
    envelopes: &[Envelope],
) -> Result<()> {
    // Pushing defaults on for remotes and off for local repositories.
    let should_push = push.unwrap_or(locator.transport != Transport::File);

    let (repo, _scratch) = open_or_clone(locator)?;

    let (existing, was_sharded) = match read_note_blob(&repo, locator)? {
        Some((data, _path, sharded)) => (data, sharded),
        None => (Vec::new(), false),
    };

    // A bundle we cannot parse is one we must not append to.
    if !existing.is_empty() {
        jsonl::validate(&existing)
            .map_err(|e| e.in_repository("note: existing note data is not valid JSONL"))?;
    }

    let mut data = existing;
    if !data.is_empty() && !data.ends_with(b"\n") {
        data.push(b'\n');
    }
    for envelope in envelopes {
        let mut line = envelope.to_json_vec()?;
        data.append(&mut line);
        data.push(b'\n');
    }

    let shard = was_sharded || repo_uses_sharding(&repo)?;
    if shard && !was_sharded {
        debug!("transitioning note for {} to sharded layout", locator.commit);
    }

    let tree_id = build_notes_tree(&repo, locator, shard, &data)?;
    commit_notes_tree(&repo, locator, tree_id)?;

    if should_push {
        push_notes(&repo)?;
    }
    Ok(())
}

/// True when the notes tree already contains a two-character top-level
/// directory (the sharding convention).
fn repo_uses_sharding(repo: &git2::Repository) -> Result<bool> {
    let Some(tree) = notes_tree(repo)? else {
        return Ok(false);
    };
    Ok(tree.iter().any(|entry| {
        entry.kind() == Some(git2::ObjectType::Tree)
            && entry.name().map(str::len) == Some(2)
    }))
}

/// Builds the updated notes tree: the current tree with the commit's
/// note entry replaced by the new blob (wrapped in a two-character
/// subtree for the sharded layout). The tree builder keeps entries in
/// git's canonical sort order; unsorted trees are rejected by git.
fn build_notes_tree(
    repo: &git2::Repository,
    locator: &NoteLocator,
    shard: bool,
    data: &[u8],
) -> Result<git2::Oid> {
    let blob_id = repo.blob(data).map_err(|source| Error::Git {
        context: "storing note blob".to_string(),
        source,
    })?;

    let base_tree = notes_tree(repo)?;
    let mut builder = repo
        .treebuilder(base_tree.as_ref())
        .map_err(|source| Error::Git {
            context: "creating tree builder".to_string(),
            source,
        })?;

    let git_err = |context: &str| {
        let context = context.to_string();
        move |source: git2::Error| Error::Git { context, source }
    };

    if shard {
        let dir = &locator.commit[..2];
        let rest = &locator.commit[2..];

        // A flat entry for the same commit is superseded by the sharded
        // one.
        if builder
            .get(locator.flat_path())
            .map_err(git_err("inspecting tree"))?
            .is_some()
        {
            builder
                .remove(locator.flat_path())
                .map_err(git_err("dropping flat note entry"))?;
        }

        // Start the subtree from the existing shard directory so other
        // commits under the same prefix survive.
        let sub_base = match builder.get(dir).map_err(git_err("inspecting tree"))? {
            Some(entry) if entry.kind() == Some(git2::ObjectType::Tree) => Some(
                repo.find_tree(entry.id())
                    .map_err(git_err("reading shard subtree"))?,
            ),
            _ => None,
        };
        let mut sub_builder = repo
            .treebuilder(sub_base.as_ref())
            .map_err(git_err("creating shard subtree builder"))?;
        sub_builder
            .insert(rest, blob_id, 0o100644)
            .map_err(git_err("inserting note blob"))?;
        let sub_id = sub_builder.write().map_err(git_err("writing shard subtree"))?;

        builder
            .insert(dir, sub_id, 0o040000)
            .map_err(git_err("inserting shard directory"))?;
    } else {
        builder
            .insert(locator.flat_path(), blob_id, 0o100644)
            .map_err(git_err("inserting note blob"))?;
    }

    builder.write().map_err(|source| Error::Git {
        context: "writing notes tree".to_string(),
        source,
    })
}

/// Commits the tree onto the notes ref, with the prior tip (if any) as
/// parent. The ref update is part of the commit call and is the single
/// atomic step of the store.
fn commit_notes_tree(
    repo: &git2::Repository,
    locator: &NoteLocator,
    tree_id: git2::Oid,
) -> Result<()> {
    let tree = repo.find_tree(tree_id).map_err(|source| Error::Git {
        context: "reading new notes tree".to_string(),
        source,
    })?;

    let parent = match repo.find_reference(NOTES_REF) {
        Ok(reference) => Some(reference.peel_to_commit().map_err(|source| Error::Git {
            context: "getting notes parent commit".to_string(),
            source,
        })?),
        Err(err) if err.code() == git2::ErrorCode::NotFound => None,
        Err(source) => {
            return Err(Error::Git {
                context: "getting notes reference".to_string(),
                source,
            })
        }
    };
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

    let signature = git2::Signature::now(COMMIT_AUTHOR_NAME, COMMIT_AUTHOR_EMAIL).map_err(
        |source| Error::Git {
            context: "building commit signature".to_string(),
            source,
        },
    )?;

    repo.commit(
        Some(NOTES_REF),
        &signature,
        &signature,
        &format!("Add attestations for commit {}", locator.commit),
        &tree,
        &parents,
    )
    .map_err(|source| Error::Git {
        context: "committing notes tree".to_string(),
        source,
    })?;
    Ok(())
}

/// Pushes the notes ref to origin.
fn push_notes(repo: &git2::Repository) -> Result<()> {
    let mut remote = repo.find_remote("origin").map_err(|source| Error::Git {
        context: "getting remote".to_string(),
        source,
    })?;
    let mut push_opts = git2::PushOptions::new();
    push_opts.remote_callbacks(remote_callbacks());
    remote
        .push(&[&format!("{NOTES_REF}:{NOTES_REF}")], Some(&mut push_opts))
        .map_err(|source| Error::Git {
            context: "pushing notes".to_string(),
            source,
        })
}
