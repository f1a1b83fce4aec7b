//! Depth-first paragraph enumeration over a story.
//!
//! Within every container (story, table cell) the direct paragraphs come
//! first, then each table in order, row by row and cell by cell, recursing
//! into nested tables. The walk keeps its own stack so deeply nested tables
//! never grow the call stack.

use super::tree::{Block, Cell, Paragraph, Story, Table};

enum Node<'a> {
    Paragraph(&'a Paragraph),
    Table(&'a Table),
    Cell(&'a Cell),
}

enum NodeMut<'a> {
    Paragraph(&'a mut Paragraph),
    Table(&'a mut Table),
    Cell(&'a mut Cell),
}

pub struct Paragraphs<'a> {
    stack: Vec<std::vec::IntoIter<Node<'a>>>,
}

pub struct ParagraphsMut<'a> {
    stack: Vec<std::vec::IntoIter<NodeMut<'a>>>,
}

fn container_nodes(blocks: &[Block]) -> Vec<Node<'_>> {
    let paragraphs = blocks.iter().filter_map(|b| match b {
        Block::Paragraph(p) => Some(Node::Paragraph(p)),
        _ => None,
    });
    let tables = blocks.iter().filter_map(|b| match b {
        Block::Table(t) => Some(Node::Table(t)),
        _ => None,
    });
    paragraphs.chain(tables).collect()
}

fn container_nodes_mut(blocks: &mut [Block]) -> Vec<NodeMut<'_>> {
    let mut paragraphs = Vec::new();
    let mut tables = Vec::new();
    for block in blocks.iter_mut() {
        match block {
            Block::Paragraph(p) => paragraphs.push(NodeMut::Paragraph(p)),
            Block::Table(t) => tables.push(NodeMut::Table(t)),
            Block::Other(_) => {}
        }
    }
    paragraphs.extend(tables);
    paragraphs
}

impl<'a> Iterator for Paragraphs<'a> {
    type Item = &'a Paragraph;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(top) = self.stack.last_mut() {
            match top.next() {
                None => {
                    self.stack.pop();
                }
                Some(Node::Paragraph(p)) => return Some(p),
                Some(Node::Table(t)) => {
                    let cells: Vec<Node<'a>> =
                        t.rows().flat_map(|r| r.cells()).map(Node::Cell).collect();
                    self.stack.push(cells.into_iter());
                }
                Some(Node::Cell(c)) => self.stack.push(container_nodes(&c.blocks).into_iter()),
            }
        }
        None
    }
}

impl<'a> Iterator for ParagraphsMut<'a> {
    type Item = &'a mut Paragraph;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(top) = self.stack.last_mut() {
            match top.next() {
                None => {
                    self.stack.pop();
                }
                Some(NodeMut::Paragraph(p)) => return Some(p),
                Some(NodeMut::Table(t)) => {
                    let cells: Vec<NodeMut<'a>> = t
                        .rows_mut()
                        .flat_map(|r| r.cells_mut())
                        .map(NodeMut::Cell)
                        .collect();
                    self.stack.push(cells.into_iter());
                }
                Some(NodeMut::Cell(c)) => {
                    self.stack.push(container_nodes_mut(&mut c.blocks).into_iter())
                }
            }
        }
        None
    }
}

impl Story {
    /// Every paragraph of the story, tables included; a fresh call restarts the walk.
    pub fn paragraphs(&self) -> Paragraphs<'_> {
        Paragraphs {
            stack: vec![container_nodes(&self.blocks).into_iter()],
        }
    }

    pub fn paragraphs_mut(&mut self) -> ParagraphsMut<'_> {
        ParagraphsMut {
            stack: vec![container_nodes_mut(&mut self.blocks).into_iter()],
        }
    }
}
