use crate::bus::Message;
use crate::error;
use crate::state::{ArcShared, Shared};

/// publishes a size recalculation for every live directory, oldest first.
/// returns how many were signalled
pub async fn signal_all(state: &Shared, batch: i64) -> error::Result<u64> {
    let mut after = 0;
    let mut count = 0;

    loop {
        let found = state.store().directories_after(after, batch).await?;

        let Some((last, _)) = found.last() else {
            break;
        };

        after = *last;

        for (_, key) in &found {
            state.publish(Message::size_recalc(key))?;

            count += 1;
        }

        if (found.len() as i64) < batch {
            break;
        }
    }

    Ok(count)
}

pub async fn run(state: ArcShared, batch: i64) -> error::Result<()> {
    let count = signal_all(&state, batch).await?;

    tracing::info!("signalled {count} directories for size recalculation");

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::test_support::Env;

    #[tokio::test]
    async fn walks_in_batches() {
        let env = Env::new();
        let mut dirs = Vec::new();

        for index in 0..5 {
            dirs.push(env.dir(&format!("d{index}"), None).await);
        }

        crate::hierarchy::delete_node(&env.state, &dirs[2].key, crate::test_support::OWNER)
            .await
            .expect("failed to delete");

        env.queue.clear();

        let count = signal_all(&env.state, 2).await.expect("sweep failed");

        assert_eq!(count, 4);

        let expected: Vec<Message> = dirs.iter()
            .enumerate()
            .filter(|(index, _)| *index != 2)
            .map(|(_, dir)| Message::size_recalc(&dir.key))
            .collect();

        assert_eq!(env.queue.pending(), expected);
    }
}
